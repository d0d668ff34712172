//! TCP relay over a peer-to-peer transport stream.
//!
//! A [`Relay`] owns exactly one transport stream and exactly one local TCP
//! connection (the "virtual socket"). Bytes are copied in both directions
//! concurrently until either side reaches end-of-stream or fails, then both
//! ends are torn down together:
//!
//! ```text
//!            ┌──────────────── Relay ────────────────┐
//!  TCP peer ─┤ tcp read  ──copy──► stream write      ├─ transport stream
//!            │ tcp write ◄──copy── stream read       │
//!            └───────────────────────────────────────┘
//! ```
//!
//! Two ways to obtain the TCP side:
//!
//! - [`Relay::open`] binds an ephemeral listener on `127.0.0.1` and accepts
//!   the first local client; further clients are refused while it is active.
//! - [`Relay::open_to`] connects out to a local server that is already
//!   listening, which is how the accepting side of a session reaches the
//!   application's TCP server.
//!
//! While a listening relay waits for its client it keeps reading the
//! transport stream, so a remote that goes away before anybody connected
//! still closes the relay. Bytes that arrive meanwhile are held (up to
//! [`EARLY_BYTES_LIMIT`]) and written to the client first.
//!
//! Teardown is immediate: buffered-but-unsent bytes are dropped, and the
//! local TCP socket is closed without draining what the client still sends,
//! so the client may see a reset instead of a clean end-of-stream.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Transport bytes a listening relay holds while no local client is
/// connected. Beyond this the relay stops reading until the client arrives.
pub const EARLY_BYTES_LIMIT: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Lifecycle of a relay. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for the local TCP peer.
    Idle,
    /// Forwarding between the TCP peer and the transport stream.
    Open,
    Closed,
}

/// Handle to a running relay. Cheap to clone; every clone controls the same relay.
#[derive(Debug, Clone)]
pub struct Relay {
    inner: std::sync::Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    port: u16,
    state: tokio::sync::watch::Sender<RelayState>,
    virtual_sockets: std::sync::atomic::AtomicUsize,
    cancel: tokio_util::sync::CancellationToken,
}

impl Relay {
    /// Bind an ephemeral local listener and start relaying `stream` to the
    /// first TCP client that connects to it.
    ///
    /// Returns once the listener is bound; [`Relay::port`] is the port local
    /// applications should connect to. A bind failure (for example socket
    /// exhaustion) is reported as [`RelayError::Bind`](crate::RelayError::Bind)
    /// and `stream` is dropped.
    pub async fn open<S>(stream: S) -> Result<Self, crate::RelayError>
    where
        S: crate::TransportStream + 'static,
    {
        Self::open_on(stream, 0).await
    }

    /// [`Relay::open`] on a fixed local port; `0` picks an ephemeral one.
    #[tracing::instrument(skip(stream))]
    pub async fn open_on<S>(stream: S, port: u16) -> Result<Self, crate::RelayError>
    where
        S: crate::TransportStream + 'static,
    {
        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| crate::RelayError::Bind { source })?;
        let port = listener
            .local_addr()
            .map_err(|source| crate::RelayError::Bind { source })?
            .port();

        let relay = Self::new(port);
        tracing::info!(port, "relay listening");

        tokio::spawn(serve_listener(relay.inner.clone(), listener, stream));
        Ok(relay)
    }

    /// Connect to a local TCP server on `port` and relay `stream` to it.
    #[tracing::instrument(skip(stream))]
    pub async fn open_to<S>(stream: S, port: u16) -> Result<Self, crate::RelayError>
    where
        S: crate::TransportStream + 'static,
    {
        let tcp = tokio::net::TcpStream::connect((std::net::Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| crate::RelayError::Connect { port, source })?;

        let relay = Self::new(port);
        relay.inner.attach();
        tracing::info!(port, "relay connected to local server");

        tokio::spawn(serve_connection(relay.inner.clone(), tcp, stream));
        Ok(relay)
    }

    fn new(port: u16) -> Self {
        let (state, _) = tokio::sync::watch::channel(RelayState::Idle);
        Self {
            inner: std::sync::Arc::new(Inner {
                port,
                state,
                virtual_sockets: std::sync::atomic::AtomicUsize::new(0),
                cancel: tokio_util::sync::CancellationToken::new(),
            }),
        }
    }

    /// Local TCP port of this relay: the listener port for [`Relay::open`],
    /// the application server port for [`Relay::open_to`].
    pub fn port(&self) -> u16 {
        self.inner.port
    }

    pub fn state(&self) -> RelayState {
        *self.inner.state.borrow()
    }

    /// 1 while a local TCP peer is connected and forwarding, 0 otherwise.
    ///
    /// Diagnostic only.
    pub fn virtual_socket_count(&self) -> usize {
        self.inner
            .virtual_sockets
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Tear the relay down: listener, TCP connection and transport stream.
    ///
    /// Safe to call any number of times from any number of clones; only the
    /// first call has an effect.
    pub fn close(&self) {
        if !self.inner.cancel.is_cancelled() {
            tracing::debug!(port = self.inner.port, "closing relay");
        }
        self.inner.cancel.cancel();
    }

    /// Resolves once the relay reached [`RelayState::Closed`] and released
    /// its sockets.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| *s == RelayState::Closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.state() == RelayState::Closed
    }
}

impl Inner {
    fn attach(&self) {
        self.virtual_sockets
            .store(1, std::sync::atomic::Ordering::SeqCst);
        self.state.send_replace(RelayState::Open);
    }

    fn finish(&self) {
        self.virtual_sockets
            .store(0, std::sync::atomic::Ordering::SeqCst);
        self.state.send_replace(RelayState::Closed);
        self.cancel.cancel();
        tracing::info!(port = self.port, "relay closed");
    }
}

async fn serve_listener<S>(
    inner: std::sync::Arc<Inner>,
    listener: tokio::net::TcpListener,
    stream: S,
) where
    S: crate::TransportStream + 'static,
{
    let (mut stream_read, stream_write) = tokio::io::split(stream);
    let mut early = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    let accepted = loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break None,
            accepted = listener.accept() => break match accepted {
                Ok((tcp, peer)) => {
                    tracing::debug!(port = inner.port, %peer, "local client connected");
                    Some(tcp)
                }
                Err(e) => {
                    tracing::warn!(port = inner.port, error = %e, "relay accept failed");
                    None
                }
            },
            read = stream_read.read(&mut chunk), if early.len() < EARLY_BYTES_LIMIT => match read {
                Ok(0) => {
                    tracing::debug!(port = inner.port, "transport closed before a local client connected");
                    break None;
                }
                Ok(n) => early.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::warn!(port = inner.port, error = %e, "transport failed before a local client connected");
                    break None;
                }
            },
        }
    };

    let Some(tcp) = accepted else {
        drop(listener);
        drop(stream_read);
        drop(stream_write);
        inner.finish();
        return;
    };

    inner.attach();

    let mut forwarding = Box::pin(forward(tcp, stream_read, stream_write, early));
    let mut accepting = true;

    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            result = &mut forwarding => {
                log_forwarding(inner.port, result);
                break;
            }
            extra = listener.accept(), if accepting => match extra {
                Ok((extra, peer)) => {
                    tracing::debug!(port = inner.port, %peer, "refusing extra local client");
                    drop(extra);
                }
                Err(e) => {
                    tracing::warn!(port = inner.port, error = %e, "relay stopped accepting");
                    accepting = false;
                }
            },
        }
    }

    drop(forwarding);
    drop(listener);
    inner.finish();
}

async fn serve_connection<S>(inner: std::sync::Arc<Inner>, tcp: tokio::net::TcpStream, stream: S)
where
    S: crate::TransportStream + 'static,
{
    let (stream_read, stream_write) = tokio::io::split(stream);
    let mut forwarding = Box::pin(forward(tcp, stream_read, stream_write, Vec::new()));

    tokio::select! {
        _ = inner.cancel.cancelled() => {}
        result = &mut forwarding => log_forwarding(inner.port, result),
    }

    drop(forwarding);
    inner.finish();
}

fn log_forwarding(port: u16, result: Result<(), crate::RelayError>) {
    match result {
        Ok(()) => tracing::debug!(port, "relay reached end of stream"),
        Err(e) => tracing::warn!(port, error = %e, "relay forwarding ended with error"),
    }
}

/// Copy both directions until the first one finishes; the other is dropped.
///
/// `early` holds transport bytes read before the TCP side existed; they are
/// written to the TCP side ahead of everything else.
async fn forward<R, W>(
    tcp: tokio::net::TcpStream,
    mut stream_read: R,
    mut stream_write: W,
    early: Vec<u8>,
) -> Result<(), crate::RelayError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let (mut tcp_read, mut tcp_write) = tcp.into_split();

    let to_peer = async {
        let bytes = tokio::io::copy(&mut tcp_read, &mut stream_write).await?;
        stream_write.shutdown().await?;
        Ok::<_, std::io::Error>(bytes)
    };

    let from_peer = async {
        tcp_write.write_all(&early).await?;
        let bytes = tokio::io::copy(&mut stream_read, &mut tcp_write).await?;
        tcp_write.shutdown().await?;
        Ok::<_, std::io::Error>(early.len() as u64 + bytes)
    };

    let result = tokio::select! {
        sent = to_peer => sent.map(|bytes| {
            tracing::debug!(bytes, "local side closed");
        }),
        received = from_peer => received.map(|bytes| {
            tracing::debug!(bytes, "transport side closed");
        }),
    };

    result.map_err(|source| crate::RelayError::Forwarding { source })
}
