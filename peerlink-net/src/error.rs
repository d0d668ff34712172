/// Failures reported by a [`DiscoveryTransport`](crate::DiscoveryTransport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invitation was rejected by the remote peer")]
    Rejected,

    #[error("invitation timed out after {timeout:?}")]
    Timeout { timeout: std::time::Duration },

    #[error("transport does not know peer {handle}")]
    UnknownPeer { handle: crate::TransportHandle },

    #[error("transport is not advertising")]
    NotAdvertising,

    #[error("transport is closed")]
    Closed,

    #[error("transport I/O error: {source}")]
    Io { source: std::io::Error },

    #[error("transport error: {source}")]
    Other { source: eyre::Error },
}

/// Failures of a [`Relay`](crate::Relay).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind local relay listener: {source}")]
    Bind { source: std::io::Error },

    #[error("failed to connect relay to local port {port}: {source}")]
    Connect { port: u16, source: std::io::Error },

    #[error("relay forwarding failed: {source}")]
    Forwarding { source: std::io::Error },
}
