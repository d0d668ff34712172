use crate::ParsePeerIdentifierError;

/// Application-level name of a logical peer.
///
/// Opaque beyond lexicographic comparison, which negotiation uses to decide
/// which side of a simultaneous invitation race accepts. Identifiers never
/// contain the invitation-context separators `+` and `:`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerIdentifier(String);

impl PeerIdentifier {
    /// Mint a fresh identifier for this process.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PeerIdentifier {
    type Err = ParsePeerIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl TryFrom<String> for PeerIdentifier {
    type Error = ParsePeerIdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(ParsePeerIdentifierError::Empty);
        }

        for reserved in [
            crate::CONTEXT_PEER_SEPARATOR,
            crate::CONTEXT_GENERATION_SEPARATOR,
        ] {
            if value.contains(reserved) {
                return Err(ParsePeerIdentifierError::ReservedCharacter {
                    identifier: value,
                    reserved,
                });
            }
        }

        Ok(Self(value))
    }
}

impl From<PeerIdentifier> for String {
    fn from(value: PeerIdentifier) -> Self {
        value.0
    }
}

impl AsRef<str> for PeerIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
