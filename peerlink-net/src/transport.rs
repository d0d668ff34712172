//! Discovery transport contract.
//!
//! A proximity transport (Multipeer-style radio, BLE, Wi-Fi Aware, or the
//! in-process memory network used by tests) exposes:
//!
//! - advertising under a per-start [`TransportHandle`] with a small
//!   [`DiscoveryInfo`] map,
//! - browsing for other advertisers of the same service,
//! - outbound invitations that resolve to a connected byte stream,
//! - inbound invitations that the node accepts or rejects,
//! - changes in the availability of the radio underneath.
//!
//! Asynchronous callbacks are not closures held by the transport; they are
//! [`TransportEvent`]s pushed onto a `tokio::sync::mpsc` channel which the
//! node drains in order.

/// Discovery metadata key carrying the advertiser's peer identifier.
pub const PEER_IDENTIFIER_KEY: &str = "peerIdentifier";

/// Discovery metadata key carrying the advertiser's generation tag.
pub const GENERATION_KEY: &str = "generation";

/// Key/value metadata published while advertising.
pub type DiscoveryInfo = std::collections::HashMap<String, String>;

/// Reliable, ordered, bidirectional byte channel to a remote peer.
///
/// Closing is dropping (or shutting down the write side); the remote close
/// notification is end-of-stream or an error on read.
pub trait TransportStream: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}

impl<T> TransportStream for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn TransportStream>;

/// Transport-level handle of one advertisement.
///
/// Minted fresh every time advertising (re)starts, so it changes across
/// restarts of the same logical peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportHandle(String);

impl TransportHandle {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransportHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TransportHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<[u8]> for TransportHandle {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Answer channel for one inbound invitation. Consumed by either call.
#[async_trait::async_trait]
pub trait InvitationReply: Send {
    /// Accept and wait for the transport-level handshake to produce a stream.
    async fn accept(self: Box<Self>) -> Result<BoxedStream, crate::TransportError>;

    fn reject(self: Box<Self>);
}

/// Whether the radio a transport runs on can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    On,
    /// Present but switched off by the user or the system.
    Off,
    /// Missing, unsupported or not permitted on this device.
    Unavailable,
}

/// Callbacks from the transport, in delivery order.
pub enum TransportEvent {
    PeerFound {
        handle: TransportHandle,
        info: DiscoveryInfo,
    },
    PeerLost {
        handle: TransportHandle,
    },
    InvitationReceived {
        from: TransportHandle,
        context: Vec<u8>,
        reply: Box<dyn InvitationReply>,
    },
    AdvertisingFailed {
        source: crate::TransportError,
    },
    BrowsingFailed {
        source: crate::TransportError,
    },
    /// Sent whenever the radio changes state. Peers still in range are
    /// reported found again once it is back `On`.
    RadioStateChanged {
        state: RadioState,
    },
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportEvent::PeerFound { handle, info } => f
                .debug_struct("PeerFound")
                .field("handle", handle)
                .field("info", info)
                .finish(),
            TransportEvent::PeerLost { handle } => {
                f.debug_struct("PeerLost").field("handle", handle).finish()
            }
            TransportEvent::InvitationReceived { from, context, .. } => f
                .debug_struct("InvitationReceived")
                .field("from", from)
                .field("context", &String::from_utf8_lossy(context))
                .finish_non_exhaustive(),
            TransportEvent::AdvertisingFailed { source } => f
                .debug_struct("AdvertisingFailed")
                .field("source", source)
                .finish(),
            TransportEvent::BrowsingFailed { source } => f
                .debug_struct("BrowsingFailed")
                .field("source", source)
                .finish(),
            TransportEvent::RadioStateChanged { state } => f
                .debug_struct("RadioStateChanged")
                .field("state", state)
                .finish(),
        }
    }
}

/// Outbound side of a discovery transport.
///
/// Implementations report everything asynchronous through the
/// [`TransportEvent`] channel they were constructed with.
#[async_trait::async_trait]
pub trait DiscoveryTransport: Send + Sync + 'static {
    async fn start_advertising(
        &self,
        service_id: &str,
        handle: &TransportHandle,
        info: &DiscoveryInfo,
    ) -> Result<(), crate::TransportError>;

    async fn stop_advertising(&self) -> Result<(), crate::TransportError>;

    async fn start_browsing(&self, service_id: &str) -> Result<(), crate::TransportError>;

    async fn stop_browsing(&self) -> Result<(), crate::TransportError>;

    /// Invite `peer`, resolving once the remote accepted and the stream is
    /// connected. `timeout` is enforced by the transport.
    async fn invite(
        &self,
        peer: &TransportHandle,
        context: &[u8],
        timeout: std::time::Duration,
    ) -> Result<BoxedStream, crate::TransportError>;
}
