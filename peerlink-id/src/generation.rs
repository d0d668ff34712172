use base64::Engine;
use sha2::Digest;

use crate::{ParseGenerationTagError, PeerIdentifier};

/// Identifier plus transport-handle digest, distinguishing successive
/// advertisements (restarts) of the same logical peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GenerationTag {
    peer_identifier: PeerIdentifier,
    suffix: String,
}

/// URL-safe, unpadded base64 of the SHA-256 of a transport handle.
///
/// The URL-safe alphabet never produces `+`, `:` or `.`, so the digest can be
/// embedded in generation tags and invitation contexts verbatim.
pub fn handle_digest(handle: impl AsRef<[u8]>) -> String {
    let digest = sha2::Sha256::digest(handle.as_ref());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Derive the generation tag for `local` advertising under `handle`.
///
/// Pure and deterministic: the same inputs always yield the same tag, on any
/// node, which is what lets the receiver of an invitation recompute the
/// inviter's generation from the transport handle it observed.
pub fn make_generation_tag(local: &PeerIdentifier, handle: impl AsRef<[u8]>) -> GenerationTag {
    GenerationTag {
        peer_identifier: local.clone(),
        suffix: handle_digest(handle),
    }
}

impl GenerationTag {
    pub fn peer_identifier(&self) -> &PeerIdentifier {
        &self.peer_identifier
    }

    /// The digest part, which is what invitation contexts carry.
    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl std::fmt::Display for GenerationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.peer_identifier,
            crate::GENERATION_SEPARATOR,
            self.suffix
        )
    }
}

impl std::str::FromStr for GenerationTag {
    type Err = ParseGenerationTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (identifier, suffix) = s.rsplit_once(crate::GENERATION_SEPARATOR).ok_or_else(|| {
            ParseGenerationTagError::MissingSeparator { tag: s.to_string() }
        })?;

        if suffix.is_empty() {
            return Err(ParseGenerationTagError::EmptyDigest { tag: s.to_string() });
        }

        let peer_identifier = identifier
            .parse()
            .map_err(|source| ParseGenerationTagError::Identifier { source })?;

        Ok(Self {
            peer_identifier,
            suffix: suffix.to_string(),
        })
    }
}

impl TryFrom<String> for GenerationTag {
    type Error = ParseGenerationTagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GenerationTag> for String {
    fn from(value: GenerationTag) -> Self {
        value.to_string()
    }
}
