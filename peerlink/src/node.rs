//! Discovery facade: the application-facing side of a peerlink node.
//!
//! A [`Node`] owns one [`DiscoveryTransport`], drains its
//! [`TransportEvent`]s in delivery order and turns them into
//! [`PeerEvent`]s for the application, while invitations are handed to the
//! negotiation layer.
//!
//! ```text
//!                 TransportEvent                     PeerEvent
//!  transport ──────────────────► event loop ──────────────────► application
//!      ▲                             │
//!      │ invite / advertise          ▼
//!      └──────────────────────── negotiation ──► registry ──► relay ──► 127.0.0.1:port
//! ```

use peerlink_id::{GenerationTag, PeerIdentifier};
use peerlink_net::{
    DiscoveryInfo, DiscoveryTransport, RadioState, TransportError, TransportEvent, TransportHandle,
};

use crate::{Config, ConnectError, PeerSession, SessionRegistry, Watchdog};

/// Discovery notifications delivered to the application.
#[derive(Debug)]
pub enum PeerEvent {
    /// A peer is advertising, or a peer's invitation was turned down because
    /// this node is expected to invite it instead.
    Found {
        peer_identifier: PeerIdentifier,
        generation: GenerationTag,
    },
    Lost {
        peer_identifier: PeerIdentifier,
    },
    /// Advertising or browsing failed. The node keeps running; call
    /// [`Node::restart`] to try again.
    Failure { source: TransportError },
    /// The radio underneath the transport was switched on or off, or went
    /// away. While it is not `On` every discovered peer is reported lost;
    /// the node stays started and peers are found again once it is back.
    RadioStateChanged { state: RadioState },
}

/// What a peer advertised most recently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub handle: TransportHandle,
    pub generation: GenerationTag,
}

#[derive(Debug, Clone)]
pub(crate) struct Advertisement {
    pub(crate) handle: TransportHandle,
    pub(crate) generation: GenerationTag,
}

/// A running peerlink node. Cheap to clone.
#[derive(Clone)]
pub struct Node {
    inner: std::sync::Arc<NodeInner>,
}

pub(crate) struct NodeInner {
    pub(crate) config: Config,
    pub(crate) local: PeerIdentifier,
    pub(crate) advertisement: std::sync::RwLock<Option<Advertisement>>,
    pub(crate) transport: std::sync::Arc<dyn DiscoveryTransport>,
    pub(crate) registry: SessionRegistry,
    pub(crate) discovered: scc::HashMap<PeerIdentifier, DiscoveredPeer>,
    pub(crate) watchdog: std::sync::Arc<dyn Watchdog>,
    pub(crate) radio: tokio::sync::watch::Sender<RadioState>,
    pub(crate) events: tokio::sync::mpsc::Sender<PeerEvent>,
    pub(crate) shutdown: tokio_util::sync::CancellationToken,
}

impl Node {
    /// Create a node on top of `transport` and start draining
    /// `transport_events`. Nothing is advertised until [`Node::start`].
    pub fn spawn(
        config: Config,
        transport: std::sync::Arc<dyn DiscoveryTransport>,
        transport_events: tokio::sync::mpsc::Receiver<TransportEvent>,
        watchdog: std::sync::Arc<dyn Watchdog>,
    ) -> (Self, tokio::sync::mpsc::Receiver<PeerEvent>) {
        let (events, peer_events) = tokio::sync::mpsc::channel(config.event_buffer.max(1));
        let local = config
            .peer_identifier
            .clone()
            .unwrap_or_else(PeerIdentifier::generate);

        tracing::info!(%local, service_id = %config.service_id, "spawning node");

        let inner = std::sync::Arc::new(NodeInner {
            config,
            local,
            advertisement: std::sync::RwLock::new(None),
            transport,
            registry: SessionRegistry::new(),
            discovered: scc::HashMap::new(),
            watchdog,
            radio: tokio::sync::watch::channel(RadioState::On).0,
            events,
            shutdown: tokio_util::sync::CancellationToken::new(),
        });

        tokio::spawn(run_event_loop(inner.clone(), transport_events));

        (Self { inner }, peer_events)
    }

    pub fn local_identifier(&self) -> &PeerIdentifier {
        &self.inner.local
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current generation tag, `None` while stopped.
    pub fn generation(&self) -> Option<GenerationTag> {
        self.inner.advertisement().map(|ad| ad.generation)
    }

    pub fn is_started(&self) -> bool {
        self.inner.advertisement().is_some()
    }

    /// Last radio state the transport reported. `On` until told otherwise.
    pub fn radio_state(&self) -> RadioState {
        *self.inner.radio.borrow()
    }

    /// Start advertising under a fresh transport handle, then browse.
    #[tracing::instrument(skip(self), fields(local = %self.inner.local))]
    pub async fn start(&self) -> Result<(), TransportError> {
        self.inner.start().await
    }

    /// Stop advertising and browsing, disconnect every session and forget
    /// every discovered peer.
    #[tracing::instrument(skip(self), fields(local = %self.inner.local))]
    pub async fn stop(&self) -> Result<(), TransportError> {
        self.inner.stop().await
    }

    /// [`Node::stop`] then [`Node::start`]. The generation tag changes.
    pub async fn restart(&self) -> Result<(), TransportError> {
        let stopped = self.inner.stop().await;
        self.inner.start().await?;
        stopped
    }

    /// Stop and end the event loop. The node is unusable afterwards.
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.stop().await {
            tracing::warn!(error = %e, "stop during shutdown failed");
        }
        self.inner.shutdown.cancel();
    }

    pub fn session(&self, peer: &PeerIdentifier) -> Option<PeerSession> {
        self.inner.registry.lookup(peer)
    }

    pub fn sessions(&self) -> Vec<PeerSession> {
        self.inner.registry.values()
    }

    pub fn discovered_peer(&self, peer: &PeerIdentifier) -> Option<DiscoveredPeer> {
        self.inner.discovered.read(peer, |_, found| found.clone())
    }

    pub fn discovered_peers(&self) -> Vec<PeerIdentifier> {
        let mut peers = Vec::with_capacity(self.inner.discovered.len());
        self.inner.discovered.scan(|peer, _| peers.push(peer.clone()));
        peers
    }

    /// Invite `peer` and relay the resulting stream on a fresh local TCP port.
    ///
    /// Returns the port the application should connect to. If a connected
    /// session with `peer` already exists, its relay port is returned instead.
    pub async fn connect(&self, peer: &PeerIdentifier) -> Result<u16, ConnectError> {
        self.inner.connect(peer).await
    }

    /// Local TCP port for the connected session with `peer`. A session that
    /// just connected is waited for until its relay is up.
    pub async fn open_relay(&self, peer: &PeerIdentifier) -> Result<u16, ConnectError> {
        self.inner.open_relay(peer).await
    }

    /// Close the relay to `peer` and disconnect its session. Returns whether
    /// there was a session.
    pub fn close_relay(&self, peer: &PeerIdentifier) -> bool {
        self.inner.close_relay(peer)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("local", &self.inner.local)
            .field("generation", &self.generation())
            .field("sessions", &self.inner.registry.len())
            .finish()
    }
}

impl NodeInner {
    pub(crate) fn advertisement(&self) -> Option<Advertisement> {
        self.advertisement
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn set_advertisement(&self, advertisement: Option<Advertisement>) {
        *self
            .advertisement
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = advertisement;
    }

    /// Hand an event to the application without stalling the event loop.
    pub(crate) fn emit(&self, event: PeerEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(?event, "peer event channel full, dropping event");
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    async fn start(&self) -> Result<(), TransportError> {
        if let Some(ad) = self.advertisement() {
            tracing::debug!(generation = %ad.generation, "already started");
            return Ok(());
        }

        let handle = TransportHandle::generate();
        let generation = peerlink_id::make_generation_tag(&self.local, &handle);

        let mut info = DiscoveryInfo::new();
        info.insert(
            peerlink_net::PEER_IDENTIFIER_KEY.to_string(),
            self.local.to_string(),
        );
        info.insert(peerlink_net::GENERATION_KEY.to_string(), generation.to_string());

        // Invitations can arrive as soon as the advertisement is out.
        self.set_advertisement(Some(Advertisement {
            handle: handle.clone(),
            generation: generation.clone(),
        }));

        if let Err(e) = self
            .transport
            .start_advertising(&self.config.service_id, &handle, &info)
            .await
        {
            tracing::error!(error = %e, "failed to start advertising");
            self.set_advertisement(None);
            return Err(e);
        }

        if let Err(e) = self.transport.start_browsing(&self.config.service_id).await {
            tracing::error!(error = %e, "failed to start browsing");
            self.set_advertisement(None);
            if let Err(e) = self.transport.stop_advertising().await {
                tracing::warn!(error = %e, "failed to stop advertising");
            }
            return Err(e);
        }

        tracing::info!(%generation, %handle, "node started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.set_advertisement(None);

        let advertising = self.transport.stop_advertising().await;
        let browsing = self.transport.stop_browsing().await;

        for peer in self.registry.keys() {
            self.registry.update(peer, |current| {
                if let Some(session) = current {
                    session.disconnect();
                }
                None
            });
        }
        self.discovered.clear();

        tracing::info!("node stopped");
        advertising.and(browsing)
    }

    fn peer_found(&self, handle: TransportHandle, info: &DiscoveryInfo) {
        let Some((peer, generation)) = parse_discovery_info(&handle, info) else {
            tracing::warn!(%handle, ?info, "ignoring peer with malformed discovery info");
            return;
        };

        if peer == self.local {
            return;
        }

        let found = DiscoveredPeer {
            handle: handle.clone(),
            generation: generation.clone(),
        };
        let previous = match self.discovered.entry(peer.clone()) {
            scc::hash_map::Entry::Occupied(mut occupied) => {
                Some(std::mem::replace(occupied.get_mut(), found))
            }
            scc::hash_map::Entry::Vacant(vacant) => {
                vacant.insert_entry(found);
                None
            }
        };
        if previous.is_some_and(|previous| previous.handle != handle) {
            tracing::info!(%peer, %generation, "peer advertised a new generation");
        }

        // A session bound to an older advertisement of this peer is stale.
        self.registry.update(peer.clone(), |current| match current {
            Some(session) if session.remote_handle() != &handle => {
                tracing::info!(%peer, session = session.id(), "disconnecting session of previous generation");
                session.disconnect();
                None
            }
            other => other.cloned(),
        });

        tracing::debug!(%peer, %generation, "peer found");
        self.emit(PeerEvent::Found {
            peer_identifier: peer,
            generation,
        });
    }

    fn radio_state_changed(&self, state: RadioState) {
        let previous = self.radio.send_replace(state);
        if previous == state {
            return;
        }
        tracing::info!(?previous, ?state, "radio state changed");
        self.emit(PeerEvent::RadioStateChanged { state });

        if state == RadioState::On {
            return;
        }
        let mut lost = Vec::new();
        self.discovered.retain(|peer, _| {
            lost.push(peer.clone());
            false
        });
        for peer in lost {
            self.emit(PeerEvent::Lost {
                peer_identifier: peer,
            });
        }
    }

    fn peer_lost(&self, handle: &TransportHandle) {
        let mut lost = Vec::new();
        self.discovered.retain(|peer, found| {
            if &found.handle == handle {
                lost.push(peer.clone());
                false
            } else {
                true
            }
        });

        for peer in lost {
            tracing::debug!(%peer, %handle, "peer lost");
            self.emit(PeerEvent::Lost {
                peer_identifier: peer,
            });
        }
    }
}

/// Identifier and generation from discovery info. The generation must belong
/// to the identifier and to the handle it was advertised under.
fn parse_discovery_info(
    handle: &TransportHandle,
    info: &DiscoveryInfo,
) -> Option<(PeerIdentifier, GenerationTag)> {
    let peer: PeerIdentifier = info.get(peerlink_net::PEER_IDENTIFIER_KEY)?.parse().ok()?;
    let generation: GenerationTag = info.get(peerlink_net::GENERATION_KEY)?.parse().ok()?;

    if generation.peer_identifier() != &peer
        || generation.suffix() != peerlink_id::handle_digest(handle)
    {
        return None;
    }
    Some((peer, generation))
}

async fn run_event_loop(
    inner: std::sync::Arc<NodeInner>,
    mut transport_events: tokio::sync::mpsc::Receiver<TransportEvent>,
) {
    loop {
        let event = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = transport_events.recv() => match event {
                Some(event) => event,
                None => {
                    tracing::info!("transport event channel closed");
                    break;
                }
            },
        };

        tracing::trace!(?event, "transport event");
        match event {
            TransportEvent::PeerFound { handle, info } => inner.peer_found(handle, &info),
            TransportEvent::PeerLost { handle } => inner.peer_lost(&handle),
            TransportEvent::InvitationReceived {
                from,
                context,
                reply,
            } => inner.handle_invitation(from, &context, reply),
            TransportEvent::AdvertisingFailed { source } => {
                tracing::error!(error = %source, "advertising failed");
                inner.emit(PeerEvent::Failure { source });
            }
            TransportEvent::BrowsingFailed { source } => {
                tracing::error!(error = %source, "browsing failed");
                inner.emit(PeerEvent::Failure { source });
            }
            TransportEvent::RadioStateChanged { state } => inner.radio_state_changed(state),
        }
    }
    tracing::debug!(local = %inner.local, "event loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(peer: &str, generation: &str) -> DiscoveryInfo {
        let mut info = DiscoveryInfo::new();
        info.insert(peerlink_net::PEER_IDENTIFIER_KEY.to_string(), peer.to_string());
        info.insert(peerlink_net::GENERATION_KEY.to_string(), generation.to_string());
        info
    }

    #[test]
    fn accepts_consistent_discovery_info() {
        let peer: PeerIdentifier = "bravo".parse().unwrap();
        let handle = TransportHandle::from("h1");
        let generation = peerlink_id::make_generation_tag(&peer, &handle);

        let parsed = parse_discovery_info(&handle, &info("bravo", &generation.to_string()));
        assert_eq!(parsed, Some((peer, generation)));
    }

    #[test]
    fn rejects_inconsistent_discovery_info() {
        let peer: PeerIdentifier = "bravo".parse().unwrap();
        let handle = TransportHandle::from("h1");
        let generation = peerlink_id::make_generation_tag(&peer, &handle);

        // generation of another handle
        let other = TransportHandle::from("h2");
        assert_eq!(parse_discovery_info(&other, &info("bravo", &generation.to_string())), None);

        // generation of another peer
        assert_eq!(parse_discovery_info(&handle, &info("charlie", &generation.to_string())), None);

        assert_eq!(parse_discovery_info(&handle, &info("bravo", "nodot")), None);
        assert_eq!(parse_discovery_info(&handle, &DiscoveryInfo::new()), None);
    }
}
