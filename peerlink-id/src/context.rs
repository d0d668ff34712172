use crate::{GenerationTag, ParseContextError, PeerIdentifier};

/// Negotiation token attached to every invitation.
///
/// Wire form: `sender + "+" + addressee + ":" + generation_suffix`, where
/// `addressee` and `generation_suffix` together name the generation of the
/// invitee the sender discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvitationContext {
    /// Identifier of the inviting peer.
    pub sender: PeerIdentifier,
    /// Identifier the inviter believes the invitee currently has.
    pub addressee: PeerIdentifier,
    /// Suffix of the invitee's generation tag as the inviter saw it
    /// advertised (see [`crate::GenerationTag::suffix`]).
    pub generation_suffix: String,
}

impl InvitationContext {
    pub fn new(
        sender: PeerIdentifier,
        addressee: PeerIdentifier,
        generation_suffix: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            addressee,
            generation_suffix: generation_suffix.into(),
        }
    }

    /// Context for inviting the peer that advertised `addressee`.
    pub fn addressed_to(sender: PeerIdentifier, addressee: &GenerationTag) -> Self {
        Self::new(
            sender,
            addressee.peer_identifier().clone(),
            addressee.suffix(),
        )
    }

    /// Whether this context addresses exactly `generation`, identifier and
    /// suffix alike.
    pub fn addresses(&self, generation: &GenerationTag) -> bool {
        &self.addressee == generation.peer_identifier()
            && self.generation_suffix == generation.suffix()
    }

    pub fn build(&self) -> String {
        self.to_string()
    }

    /// Parse the raw bytes handed over by the transport.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseContextError> {
        std::str::from_utf8(bytes)
            .map_err(|_| ParseContextError::NotUtf8)?
            .parse()
    }
}

impl std::fmt::Display for InvitationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}{}{}",
            self.sender,
            crate::CONTEXT_PEER_SEPARATOR,
            self.addressee,
            crate::CONTEXT_GENERATION_SEPARATOR,
            self.generation_suffix
        )
    }
}

impl std::str::FromStr for InvitationContext {
    type Err = ParseContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let peers: Vec<&str> = s.split(crate::CONTEXT_PEER_SEPARATOR).collect();
        if peers.len() != 2 {
            return Err(ParseContextError::PeerFieldCount {
                context: s.to_string(),
                found: peers.len(),
            });
        }

        let tail: Vec<&str> = peers[1].split(crate::CONTEXT_GENERATION_SEPARATOR).collect();
        if tail.len() != 2 {
            return Err(ParseContextError::GenerationFieldCount {
                context: s.to_string(),
                found: tail.len(),
            });
        }

        if tail[1].is_empty() {
            return Err(ParseContextError::EmptyGeneration {
                context: s.to_string(),
            });
        }

        let sender = peers[0]
            .parse()
            .map_err(|source| ParseContextError::Identifier { source })?;
        let addressee = tail[0]
            .parse()
            .map_err(|source| ParseContextError::Identifier { source })?;

        Ok(Self {
            sender,
            addressee,
            generation_suffix: tail[1].to_string(),
        })
    }
}
