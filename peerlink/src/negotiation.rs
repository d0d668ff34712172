//! Session negotiation.
//!
//! Turns inbound invitations and outbound connect requests into at most one
//! live [`PeerSession`] per remote peer.
//!
//! Inbound, an invitation is accepted only when all of these hold:
//!
//! 1. its context parses,
//! 2. it is addressed to this node's current generation, identifier and
//!    suffix alike (otherwise the sender is talking to a previous
//!    incarnation of this node),
//! 3. this node sorts *after* the sender. The lower identifier is the one
//!    that invites, so two peers inviting each other at the same moment end
//!    up with exactly one connection.
//!
//! A turned-down invitation of the third kind re-signals the peer as found,
//! which prompts the application on this side to invite instead.
//!
//! Accepting replaces whatever session the registry holds for the sender:
//! a re-invitation from the same generation means the remote restarted its
//! session without tearing the old one down.
//!
//! Every connected session gets its relay right away: the accepting side
//! connects to [`Config::application_port`](crate::Config::application_port)
//! when one is configured and listens on a fresh local port otherwise, the
//! inviting side always listens.

use peerlink_id::{GenerationTag, InvitationContext, PeerIdentifier};
use peerlink_net::{InvitationReply, Relay, TransportHandle};

use crate::node::{DiscoveredPeer, NodeInner, PeerEvent};
use crate::{ConnectError, NegotiationError, PeerSession, SessionRole, SessionState};

/// Decide whether an invitation with raw `context` may be accepted by the
/// node currently advertising as `local`.
pub fn evaluate_invitation(
    local: &GenerationTag,
    context: &[u8],
) -> Result<InvitationContext, NegotiationError> {
    let context =
        InvitationContext::parse(context).map_err(|source| NegotiationError::Parse { source })?;

    if !context.addresses(local) {
        return Err(NegotiationError::StaleGenerationRejected {
            addressee: context.addressee,
            generation_suffix: context.generation_suffix,
            current: local.clone(),
        });
    }

    let local = local.peer_identifier();
    if local < &context.sender {
        return Err(NegotiationError::TieBreakRejected {
            local: local.clone(),
            remote: context.sender,
        });
    }

    Ok(context)
}

impl NodeInner {
    #[tracing::instrument(skip_all, fields(local = %self.local, from = %from))]
    pub(crate) fn handle_invitation(
        self: &std::sync::Arc<Self>,
        from: TransportHandle,
        context: &[u8],
        reply: Box<dyn InvitationReply>,
    ) {
        // Any invitation at all shows that advertising works.
        self.watchdog.reset();

        let Some(advertisement) = self.advertisement() else {
            tracing::debug!("not started, rejecting invitation");
            reply.reject();
            return;
        };

        let context = match evaluate_invitation(&advertisement.generation, context) {
            Ok(context) => context,
            Err(NegotiationError::TieBreakRejected { local, remote }) => {
                tracing::info!(%local, %remote, "rejecting invitation, this node invites instead");
                reply.reject();
                self.resignal_found(remote, from);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "rejecting invitation");
                reply.reject();
                return;
            }
        };

        let sender = context.sender;
        let generation = peerlink_id::make_generation_tag(&sender, &from);

        let session = self.registry.update(sender.clone(), |current| {
            if let Some(current) = current {
                if current.remote_generation().suffix() == generation.suffix() {
                    tracing::info!(session = current.id(), "refreshing stale session of the same generation");
                } else {
                    tracing::info!(session = current.id(), "replacing session of another generation");
                }
                current.disconnect();
            }

            let session = PeerSession::new(
                SessionRole::Server,
                sender.clone(),
                from.clone(),
                generation.clone(),
            );
            session.begin_connecting();
            Some(session)
        });

        let Some(session) = session else {
            reply.reject();
            return;
        };

        tracing::info!(peer = %sender, session = session.id(), "accepting invitation");
        let inner = self.clone();
        tokio::spawn(async move { inner.complete_inbound(session, reply).await });
    }

    /// Tell the application about the peer, so that this side invites it.
    fn resignal_found(&self, peer: PeerIdentifier, from: TransportHandle) {
        let generation = peerlink_id::make_generation_tag(&peer, &from);
        self.discovered.entry(peer.clone()).or_insert(DiscoveredPeer {
            handle: from,
            generation: generation.clone(),
        });
        self.emit(PeerEvent::Found {
            peer_identifier: peer,
            generation,
        });
    }

    async fn complete_inbound(
        self: std::sync::Arc<Self>,
        session: PeerSession,
        reply: Box<dyn InvitationReply>,
    ) {
        let peer = session.remote_peer_identifier().clone();

        let stream = tokio::select! {
            _ = session.disconnected() => {
                tracing::debug!(%peer, "session replaced before the invitation was accepted");
                return;
            }
            accepted = reply.accept() => accepted,
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "accepting invitation failed");
                self.release(&session);
                return;
            }
        };

        if !session.mark_connected() {
            return;
        }
        tracing::info!(%peer, session = session.id(), "inbound session connected");

        let relay = match self.config.application_port {
            Some(port) => Relay::open_to(stream, port).await,
            None => Relay::open(stream).await,
        };

        match relay {
            Ok(relay) => {
                self.supervise_relay(&session, relay);
            }
            Err(e) => {
                tracing::warn!(%peer, error = %e, "could not relay the inbound session");
                self.release(&session);
            }
        }
    }

    #[tracing::instrument(skip(self), fields(local = %self.local))]
    pub(crate) async fn connect(
        self: &std::sync::Arc<Self>,
        peer: &PeerIdentifier,
    ) -> Result<u16, ConnectError> {
        if self.advertisement().is_none() {
            return Err(ConnectError::NotStarted);
        }
        let discovered = self
            .discovered
            .read(peer, |_, found| found.clone())
            .ok_or_else(|| ConnectError::UnknownPeer { peer: peer.clone() })?;

        let mut existing = None;
        let session = self.registry.update(peer.clone(), |current| {
            if let Some(current) = current.filter(|session| session.is_live()) {
                existing = Some(current.clone());
                return Some(current.clone());
            }

            let session = PeerSession::new(
                SessionRole::Client,
                peer.clone(),
                discovered.handle.clone(),
                discovered.generation.clone(),
            );
            session.begin_connecting();
            Some(session)
        });

        if let Some(existing) = existing {
            return match existing.state() {
                SessionState::Connected => self.open_session_relay(&existing).await,
                _ => Err(ConnectError::AlreadyConnecting { peer: peer.clone() }),
            };
        }
        let session = session.ok_or_else(|| ConnectError::NoSession { peer: peer.clone() })?;

        let context = InvitationContext::addressed_to(self.local.clone(), &discovered.generation).build();

        tracing::info!(%context, handle = %discovered.handle, "inviting peer");
        let invited = tokio::select! {
            _ = session.disconnected() => {
                return Err(ConnectError::Superseded { peer: peer.clone() });
            }
            invited = self.transport.invite(
                &discovered.handle,
                context.as_bytes(),
                self.config.invite_timeout(),
            ) => invited,
        };

        let stream = match invited {
            Ok(stream) => stream,
            Err(source) => {
                tracing::warn!(error = %source, "invitation failed");
                self.release(&session);
                return Err(ConnectError::Transport { source });
            }
        };

        if !session.mark_connected() {
            return Err(ConnectError::Superseded { peer: peer.clone() });
        }
        tracing::info!(session = session.id(), "outbound session connected");

        let relay = match Relay::open(stream).await {
            Ok(relay) => relay,
            Err(source) => {
                self.release(&session);
                return Err(ConnectError::Relay { source });
            }
        };

        if !self.supervise_relay(&session, relay.clone()) {
            return Err(ConnectError::Superseded { peer: peer.clone() });
        }
        Ok(relay.port())
    }

    pub(crate) async fn open_relay(
        self: &std::sync::Arc<Self>,
        peer: &PeerIdentifier,
    ) -> Result<u16, ConnectError> {
        let session = self
            .registry
            .lookup(peer)
            .filter(PeerSession::is_live)
            .ok_or_else(|| ConnectError::NoSession { peer: peer.clone() })?;
        self.open_session_relay(&session).await
    }

    /// Port of the session's relay, waiting for a just-connected session to
    /// get one.
    async fn open_session_relay(&self, session: &PeerSession) -> Result<u16, ConnectError> {
        let peer = session.remote_peer_identifier();
        if session.state() != SessionState::Connected {
            return Err(ConnectError::NotConnected { peer: peer.clone() });
        }

        session
            .attached_relay()
            .await
            .map(|relay| relay.port())
            .ok_or_else(|| ConnectError::NotConnected { peer: peer.clone() })
    }

    /// Bind `relay` to `session` and release the session once the relay
    /// closes, from either end.
    fn supervise_relay(self: &std::sync::Arc<Self>, session: &PeerSession, relay: Relay) -> bool {
        if !session.attach_relay(relay.clone()) {
            return false;
        }

        let inner = self.clone();
        let session = session.clone();
        tokio::spawn(async move {
            relay.closed().await;
            tracing::debug!(peer = %session.remote_peer_identifier(), port = relay.port(), "relay closed");
            inner.release(&session);
        });
        true
    }

    /// Disconnect `session` and drop it from the registry, unless the registry
    /// already holds a newer session for the peer.
    pub(crate) fn release(&self, session: &PeerSession) {
        session.disconnect();
        self.registry
            .update(session.remote_peer_identifier().clone(), |current| {
                match current {
                    Some(current) if current.is_same(session) => None,
                    other => other.cloned(),
                }
            });
    }

    pub(crate) fn close_relay(&self, peer: &PeerIdentifier) -> bool {
        match self.registry.lookup(peer) {
            Some(session) => {
                self.release(&session);
                true
            }
            None => false,
        }
    }
}
