/// Error returned when a string is not a usable [`PeerIdentifier`](crate::PeerIdentifier).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParsePeerIdentifierError {
    #[error("peer identifier is empty")]
    Empty,

    #[error("peer identifier {identifier:?} contains reserved character {reserved:?}")]
    ReservedCharacter { identifier: String, reserved: char },
}

/// Error returned when a string is not a valid [`GenerationTag`](crate::GenerationTag).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseGenerationTagError {
    #[error("generation tag {tag:?} has no '.' separator")]
    MissingSeparator { tag: String },

    #[error("generation tag {tag:?} has an empty digest")]
    EmptyDigest { tag: String },

    #[error("generation tag has an invalid peer identifier: {source}")]
    Identifier { source: ParsePeerIdentifierError },
}

/// Error returned when an invitation context token is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseContextError {
    #[error("invitation context is not valid UTF-8")]
    NotUtf8,

    #[error("invitation context {context:?} has {found} '+' fields, expected 2")]
    PeerFieldCount { context: String, found: usize },

    #[error("invitation context {context:?} has {found} ':' fields, expected 2")]
    GenerationFieldCount { context: String, found: usize },

    #[error("invitation context {context:?} has an empty generation suffix")]
    EmptyGeneration { context: String },

    #[error("invitation context carries an invalid peer identifier: {source}")]
    Identifier { source: ParsePeerIdentifierError },
}
