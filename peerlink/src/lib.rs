//! # peerlink
//!
//! Run plain TCP applications over proximity peer-to-peer transports.
//!
//! A proximity transport (radio discovery plus invitations) only offers an
//! opaque byte stream per connected peer. peerlink turns the noisy stream of
//! discovery and invitation events into exactly one live session per remote
//! peer and terminates every session as an ordinary local TCP port, so
//! unmodified TCP client and server code runs on top.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn demo() -> eyre::Result<()> {
//! use std::sync::Arc;
//!
//! let network = peerlink::memory::MemoryNetwork::new();
//! let (transport, transport_events) = network.transport(64);
//!
//! let (node, mut peers) = peerlink::Node::spawn(
//!     peerlink::Config::default(),
//!     transport,
//!     transport_events,
//!     Arc::new(peerlink::NoopWatchdog),
//! );
//! node.start().await?;
//!
//! while let Some(event) = peers.recv().await {
//!     if let peerlink::PeerEvent::Found { peer_identifier, .. } = event {
//!         let port = node.connect(&peer_identifier).await?;
//!         let _socket = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Roles
//!
//! When two peers discover each other, the one whose identifier sorts lower
//! invites and the other accepts. Inviting sides get a fresh local listening
//! port from [`Node::connect`]. Accepting sides are relayed to
//! [`Config::application_port`] when set, or listen on a fresh local port
//! otherwise, which [`Node::open_relay`] returns.
//!
//! ## Modules
//!
//! - [`registry`]: concurrent session map with atomic per-peer updates
//! - [`session`]: per-peer session state
//! - [`negotiation`]: invitation acceptance rules
//! - [`node`]: discovery facade and upward API
//! - [`watchdog`]: advertising watchdog hook
//! - [`memory`]: in-process transport for tests and demos

mod config;
mod error;
pub mod memory;
pub mod negotiation;
pub mod node;
pub mod registry;
pub mod session;
pub mod watchdog;

pub use config::Config;
pub use error::{ConfigError, ConnectError, NegotiationError};
pub use negotiation::evaluate_invitation;
pub use node::{DiscoveredPeer, Node, PeerEvent};
pub use registry::SessionRegistry;
pub use session::{PeerSession, SessionRole, SessionState};
pub use watchdog::{IntervalWatchdog, NoopWatchdog, Watchdog};

pub use peerlink_id::{
    GenerationTag, InvitationContext, ParseContextError, PeerIdentifier, make_generation_tag,
};
pub use peerlink_net::{
    DiscoveryTransport, RadioState, Relay, RelayError, RelayState, TransportError,
    TransportEvent, TransportHandle,
};
