//! Error types for peerlink nodes.
//!
//! Nothing here is fatal to the process: negotiation errors are logged and
//! turned into a rejected invitation, connect errors are returned to the
//! caller that asked for the connection, and relay forwarding errors only end
//! the relay.

/// Why an inbound invitation was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("malformed invitation context: {source}")]
    Parse {
        source: peerlink_id::ParseContextError,
    },

    #[error("invitation addressed to {addressee} ({generation_suffix}), but this node is now {current}")]
    StaleGenerationRejected {
        addressee: peerlink_id::PeerIdentifier,
        generation_suffix: String,
        current: peerlink_id::GenerationTag,
    },

    #[error("{local} sorts before {remote}; {local} is expected to invite instead")]
    TieBreakRejected {
        local: peerlink_id::PeerIdentifier,
        remote: peerlink_id::PeerIdentifier,
    },
}

/// Errors returned by [`Node::connect`](crate::Node::connect) and
/// [`Node::open_relay`](crate::Node::open_relay).
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("node is not started")]
    NotStarted,

    #[error("peer {peer} has not been discovered")]
    UnknownPeer { peer: peerlink_id::PeerIdentifier },

    #[error("a session with {peer} is already connecting")]
    AlreadyConnecting { peer: peerlink_id::PeerIdentifier },

    #[error("no session with {peer}")]
    NoSession { peer: peerlink_id::PeerIdentifier },

    #[error("session with {peer} is not connected")]
    NotConnected { peer: peerlink_id::PeerIdentifier },

    #[error("session with {peer} was replaced or disconnected while connecting")]
    Superseded { peer: peerlink_id::PeerIdentifier },

    #[error("connection failed: {source}")]
    Transport { source: peerlink_net::TransportError },

    #[error("relay failed: {source}")]
    Relay { source: peerlink_net::RelayError },
}

/// Errors loading a [`Config`](crate::Config).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}
