//! # peerlink-id
//!
//! Identity primitives for peerlink nodes.
//!
//! Every running peerlink node is known to the rest of the proximity network by
//! a [`PeerIdentifier`]: an opaque, application-level name that is minted once
//! per process start (or fixed by configuration). The underlying discovery
//! transport additionally hands out its own per-advertisement handle, which
//! changes every time advertising restarts.
//!
//! ## Generation Tags
//!
//! A [`GenerationTag`] glues the two together:
//!
//! ```text
//! <peer identifier> "." <base64url(sha256(transport handle))>
//! ```
//!
//! Two advertisements with the same identifier but different transport handles
//! therefore carry different generation tags, which is how a node tells a
//! restarted peer apart from the one it was talking to before.
//!
//! ```
//! use peerlink_id::{PeerIdentifier, make_generation_tag};
//!
//! let me: PeerIdentifier = "alpha".parse().unwrap();
//! let first = make_generation_tag(&me, b"handle-1");
//! let second = make_generation_tag(&me, b"handle-2");
//!
//! assert_eq!(first.peer_identifier(), second.peer_identifier());
//! assert_ne!(first, second);
//! assert!(first.to_string().starts_with("alpha."));
//! ```
//!
//! ## Invitation Contexts
//!
//! When one node invites another it attaches a small context token:
//!
//! ```text
//! <sender> "+" <addressee> ":" <addressee generation suffix>
//! ```
//!
//! The addressee part is the generation of the invitee as the sender
//! discovered it, so an invitee that restarted since can tell the invitation
//! is meant for its previous generation. [`InvitationContext`] builds and
//! parses that token. It is an in-memory
//! negotiation token only; nothing here is persisted or versioned.
//!
//! ```
//! use peerlink_id::InvitationContext;
//!
//! let context: InvitationContext = "bravo+alpha:c3VmZml4".parse().unwrap();
//! assert_eq!(context.sender.as_str(), "bravo");
//! assert_eq!(context.addressee.as_str(), "alpha");
//! assert_eq!(context.generation_suffix, "c3VmZml4");
//!
//! assert!("bravo".parse::<InvitationContext>().is_err());
//! ```

mod context;
mod errors;
mod generation;
mod identifier;

pub use context::InvitationContext;
pub use errors::{ParseContextError, ParseGenerationTagError, ParsePeerIdentifierError};
pub use generation::{GenerationTag, handle_digest, make_generation_tag};
pub use identifier::PeerIdentifier;

/// Separator between the sender and the rest of an invitation context.
pub const CONTEXT_PEER_SEPARATOR: char = '+';

/// Separator between the addressee and the generation suffix of an invitation context.
pub const CONTEXT_GENERATION_SEPARATOR: char = ':';

/// Separator between the identifier and the digest of a generation tag.
pub const GENERATION_SEPARATOR: char = '.';
