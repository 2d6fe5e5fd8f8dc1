//! Core identifier types for keyserv.
//!
//! - Key and application identifiers (numeric, serialized as plain numbers)
//! - Activation identifiers (UUID v7)

mod ids;

pub use ids::{ActivationId, ApplicationId, KeyId};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when parsing identifiers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid {kind} id: {reason}")]
    InvalidNumericId { kind: &'static str, reason: String },

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),
}
