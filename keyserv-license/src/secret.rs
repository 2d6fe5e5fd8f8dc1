//! Per-key secrets and their generation.
//!
//! A secret is the HMAC key for one license key. It is produced once when the
//! key is cut, stored by the server, and never sent back to a client.

use crate::error::{LicenseError, LicenseResult};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Raw secret bytes, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    /// Wraps existing secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Decodes a secret from its standard base64 storage form.
    pub fn from_base64(encoded: &str) -> LicenseResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| LicenseError::InvalidSecret(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Encodes the secret as standard base64 for storage.
    #[must_use]
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// Returns the secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the secret length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the secret holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.bytes.ct_eq(&other.bytes))
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Source of per-key secrets.
pub trait SecretGenerator {
    /// Returns exactly `size` random bytes.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Entropy`] if the random source cannot supply
    /// the bytes, or [`LicenseError::InvalidConfig`] if `size` is zero.
    fn generate(&self, size: usize) -> LicenseResult<Secret>;
}

/// Secret generator backed by the operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSecretGenerator;

impl SecretGenerator for OsSecretGenerator {
    fn generate(&self, size: usize) -> LicenseResult<Secret> {
        if size == 0 {
            return Err(LicenseError::InvalidConfig(
                "secret size must be non-zero".to_string(),
            ));
        }

        let mut bytes = vec![0u8; size];
        if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
            bytes.zeroize();
            return Err(LicenseError::Entropy(e.to_string()));
        }
        Ok(Secret { bytes })
    }
}
