use crate::*;

use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("securevote: plaintext out of range: {0}")]
    Domain(String),

    #[error("securevote: key mismatch - ciphertext or key material does not belong to this key")]
    KeyMismatch,

    #[error("securevote: key generation failed - no suitable {bits}-bit prime after {attempts} candidates")]
    KeyGeneration { bits: u64, attempts: usize },

    #[error("securevote: invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("securevote: not enough secret shares: need {need}, found {found}")]
    InsufficientShares { need: usize, found: usize },

    #[error("securevote: secret share {0} is corrupt or belongs to a different split")]
    CorruptShare(u8),

    #[error("securevote: election is already closed")]
    AlreadyClosed,

    #[error("securevote: key reconstruction incomplete: need {need} shares, found {found}")]
    ReconstructionIncomplete { need: usize, found: usize },

    #[error("securevote: election is {found}, expected {expected}")]
    InvalidState {
        expected: ElectionState,
        found: ElectionState,
    },

    #[error("securevote: ballot lane {0} does not match a candidate in this election")]
    UnknownCandidate(String),

    #[error("securevote: unsupported encoding version {0}")]
    UnsupportedVersion(u8),

    #[error("securevote: CBOR error: {0}")]
    Serialization(#[from] serde_cbor::Error),

    #[error("securevote: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("securevote: configuration error: {0}")]
    Config(#[from] figment::Error),
}
