//! Transport plumbing for peerlink.
//!
//! Two halves live here:
//!
//! - [`transport`]: the contract a proximity discovery transport has to fulfil
//!   (advertise, browse, invite, accept) and the events it reports back. The
//!   radio itself is somebody else's problem; peerlink only ever talks to a
//!   [`DiscoveryTransport`] and reads [`TransportEvent`]s off a channel.
//! - [`relay`]: the [`Relay`], which terminates one peer-to-peer byte stream as
//!   an ordinary local TCP socket so unmodified TCP code can run on top.
//!
//! ```text
//!  local app ──TCP──► 127.0.0.1:<port> ═══ Relay ═══ transport stream ──► remote peer
//! ```

pub mod error;
pub mod relay;
pub mod transport;

pub use error::{RelayError, TransportError};
pub use relay::{Relay, RelayState};
pub use transport::{
    BoxedStream, DiscoveryInfo, DiscoveryTransport, GENERATION_KEY, InvitationReply,
    PEER_IDENTIFIER_KEY, RadioState, TransportEvent, TransportHandle, TransportStream,
};
