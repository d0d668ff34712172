//! Per-peer session state.
//!
//! A [`PeerSession`] is either the accepting side of an inbound invitation
//! ([`SessionRole::Server`]) or the inviting side ([`SessionRole::Client`]).
//! Both share one record; the role only decides how the node proceeds once
//! the transport stream is connected.
//!
//! ```text
//! NotConnected ──► Connecting ──► Connected ──► Disconnecting ──► NotConnected
//!                      │                               ▲
//!                      └───────────────────────────────┘
//! ```
//!
//! Sessions are constructed only inside a [`SessionRegistry::update`]
//! closure, which is what keeps a single live session per peer.
//!
//! [`SessionRegistry::update`]: crate::SessionRegistry::update

static NEXT_SESSION_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Accepted an inbound invitation.
    Server,
    /// Issued an outbound invitation.
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Handle to a session with one remote peer. Clones share the same session.
#[derive(Clone)]
pub struct PeerSession {
    inner: std::sync::Arc<Inner>,
}

struct Inner {
    id: u64,
    role: SessionRole,
    remote_peer_identifier: peerlink_id::PeerIdentifier,
    remote_handle: peerlink_net::TransportHandle,
    remote_generation: peerlink_id::GenerationTag,
    state: tokio::sync::watch::Sender<SessionState>,
    relay: tokio::sync::watch::Sender<Option<peerlink_net::Relay>>,
    disconnecting: std::sync::atomic::AtomicBool,
    cancel: tokio_util::sync::CancellationToken,
}

impl PeerSession {
    pub(crate) fn new(
        role: SessionRole,
        remote_peer_identifier: peerlink_id::PeerIdentifier,
        remote_handle: peerlink_net::TransportHandle,
        remote_generation: peerlink_id::GenerationTag,
    ) -> Self {
        let (state, _) = tokio::sync::watch::channel(SessionState::NotConnected);
        let (relay, _) = tokio::sync::watch::channel(None);
        Self {
            inner: std::sync::Arc::new(Inner {
                id: NEXT_SESSION_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                role,
                remote_peer_identifier,
                remote_handle,
                remote_generation,
                state,
                relay,
                disconnecting: std::sync::atomic::AtomicBool::new(false),
                cancel: tokio_util::sync::CancellationToken::new(),
            }),
        }
    }

    /// Process-unique id of this session object.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn role(&self) -> SessionRole {
        self.inner.role
    }

    pub fn remote_peer_identifier(&self) -> &peerlink_id::PeerIdentifier {
        &self.inner.remote_peer_identifier
    }

    pub fn remote_handle(&self) -> &peerlink_net::TransportHandle {
        &self.inner.remote_handle
    }

    pub fn remote_generation(&self) -> &peerlink_id::GenerationTag {
        &self.inner.remote_generation
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Connecting or Connected.
    pub fn is_live(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Connecting | SessionState::Connected
        )
    }

    /// Whether `other` is a handle to this very session object.
    pub fn is_same(&self, other: &PeerSession) -> bool {
        std::sync::Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// TCP port the application uses for this session: the relay listener
    /// port, or the application server port the relay connects to.
    pub fn application_port(&self) -> Option<u16> {
        self.inner.relay.borrow().as_ref().map(|relay| relay.port())
    }

    pub fn relay(&self) -> Option<peerlink_net::Relay> {
        self.inner.relay.borrow().clone()
    }

    /// Wait for the session's relay. `None` once the session disconnected.
    pub async fn attached_relay(&self) -> Option<peerlink_net::Relay> {
        let mut relay = self.inner.relay.subscribe();
        tokio::select! {
            _ = self.inner.cancel.cancelled() => None,
            attached = relay.wait_for(Option::is_some) => attached.ok().and_then(|relay| (*relay).clone()),
        }
    }

    /// Resolves once [`PeerSession::disconnect`] was called.
    pub async fn disconnected(&self) {
        self.inner.cancel.cancelled().await
    }

    pub(crate) fn begin_connecting(&self) {
        if !self.inner.cancel.is_cancelled() {
            self.inner.state.send_replace(SessionState::Connecting);
        }
    }

    /// Connecting → Connected. Fails if the session was disconnected meanwhile.
    pub(crate) fn mark_connected(&self) -> bool {
        self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Connecting && !self.inner.cancel.is_cancelled() {
                *state = SessionState::Connected;
                true
            } else {
                false
            }
        })
    }

    /// Bind `relay` to this session. A disconnected session closes it instead.
    pub(crate) fn attach_relay(&self, relay: peerlink_net::Relay) -> bool {
        self.inner.relay.send_if_modified(|slot| {
            if self.inner.cancel.is_cancelled() {
                relay.close();
                return false;
            }
            if let Some(previous) = slot.replace(relay) {
                previous.close();
            }
            true
        })
    }

    /// Tear the session down: close its relay and go through `Disconnecting`
    /// back to `NotConnected`.
    ///
    /// Immediate and idempotent.
    pub fn disconnect(&self) {
        if self
            .inner
            .disconnecting
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }

        tracing::info!(
            session = self.inner.id,
            peer = %self.inner.remote_peer_identifier,
            role = ?self.inner.role,
            "disconnecting session"
        );

        self.inner.state.send_replace(SessionState::Disconnecting);
        self.inner.cancel.cancel();

        if let Some(relay) = self.inner.relay.send_replace(None) {
            relay.close();
        }

        self.inner.state.send_replace(SessionState::NotConnected);
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("remote_peer_identifier", &self.inner.remote_peer_identifier)
            .field("remote_handle", &self.inner.remote_handle)
            .field("state", &self.state())
            .field("application_port", &self.application_port())
            .finish()
    }
}
