//! Error types for the licensing module.

use keyserv_types::{ApplicationId, KeyId};
use thiserror::Error;

/// Message returned to clients for any proof-token verification failure.
pub const VERIFICATION_FAILED: &str = "verification failed";

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// The random source could not supply secret bytes.
    #[error("entropy source failed: {0}")]
    Entropy(String),

    /// The proof token could not be parsed, or its key hint is absent or mistyped.
    #[error("malformed proof token: {0}")]
    MalformedToken(String),

    /// HMAC verification failed for the resolved secret.
    #[error("proof token signature invalid")]
    SignatureInvalid,

    /// The proof token is at or past its expiry.
    #[error("proof token expired at {0}")]
    Expired(i64),

    /// No secret could be resolved for the hinted key.
    #[error("secret lookup failed: {0}")]
    LookupFailed(String),

    /// The claimed application does not own the key.
    #[error("claimed application {claimed} does not own the key (owner {actual})")]
    ApplicationMismatch {
        claimed: ApplicationId,
        actual: ApplicationId,
    },

    /// The signed claims name a different key than the header hint.
    #[error("claimed key {claimed} does not match signing key {hint}")]
    KeyMismatch { claimed: KeyId, hint: KeyId },

    /// Activation attempted against a disabled key.
    #[error("license key is inactive")]
    KeyInactive,

    /// The key already has its maximum number of bound devices.
    #[error("activation limit exceeded (max {0} devices)")]
    ActivationLimitExceeded(u32),

    /// The device identifier is already bound to this key.
    #[error("device already activated: {0}")]
    AlreadyActivated(String),

    /// No key with this id exists.
    #[error("key not found: {0}")]
    KeyNotFound(KeyId),

    /// A key with this id is already stored.
    #[error("key already exists: {0}")]
    KeyExists(KeyId),

    /// No application with this id exists.
    #[error("application not found: {0}")]
    ApplicationNotFound(ApplicationId),

    /// No activation with this identifier is bound to the key.
    #[error("activation not found: {0}")]
    ActivationNotFound(String),

    /// Configuration is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A stored secret could not be decoded.
    #[error("invalid stored secret: {0}")]
    InvalidSecret(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns true for failures of the proof-token protocol.
    ///
    /// These kinds are logged in full but reported to clients only as
    /// [`VERIFICATION_FAILED`].
    #[must_use]
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken(_)
                | Self::SignatureInvalid
                | Self::Expired(_)
                | Self::LookupFailed(_)
                | Self::ApplicationMismatch { .. }
                | Self::KeyMismatch { .. }
        )
    }

    /// Returns the message safe to show a client.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            e if e.is_verification_failure() => VERIFICATION_FAILED.to_string(),
            Self::Storage(_) | Self::Serialization(_) | Self::InvalidSecret(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
