//! Proof-of-possession verification for license keys.
//!
//! Verification resolves the key named by the token's untrusted `kid` hint,
//! checks the HMAC with that key's secret, and then cross-checks the signed
//! claims against the authoritative record. A valid signature alone is not
//! enough: the claimed key and application must both match the record.

use crate::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::error::{LicenseError, LicenseResult};
use crate::key::KeyRecord;
use crate::repository::KeyRepository;
use crate::secret::Secret;
use crate::token;
use chrono::{DateTime, Utc};
use keyserv_types::KeyId;
use std::cell::RefCell;
use tracing::{debug, warn};

/// Verifies proof tokens against a key repository.
///
/// Holds no state between calls; each verification is evaluated against
/// whatever the repository returns at that moment.
pub struct KeyVerifier<'a, R: ?Sized> {
    repository: &'a R,
    audit: Option<&'a dyn AuditLog>,
}

impl<'a, R: KeyRepository + ?Sized> KeyVerifier<'a, R> {
    #[must_use]
    pub fn new(repository: &'a R) -> Self {
        Self {
            repository,
            audit: None,
        }
    }

    /// Records a [`AuditEvent::KeyAccess`] entry for every verified key.
    #[must_use]
    pub fn with_audit(mut self, audit: &'a dyn AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Verifies `token` against the system clock and returns the key it proves.
    pub fn verify_key(&self, token: &str) -> LicenseResult<KeyRecord> {
        self.verify_key_at(token, Utc::now())
    }

    /// Verifies `token` as of `now` and returns the key it proves.
    ///
    /// # Errors
    ///
    /// Any decoding error from [`token::decode`], then
    /// [`LicenseError::KeyMismatch`] if the claims name a different key than
    /// the one whose secret verified the token, and
    /// [`LicenseError::ApplicationMismatch`] if the key belongs to another
    /// application than the one claimed.
    pub fn verify_key_at(&self, token: &str, now: DateTime<Utc>) -> LicenseResult<KeyRecord> {
        let record = self.resolve(token, now).inspect_err(|e| {
            warn!(kind = %e, "Proof token verification failed");
        })?;
        if let Some(audit) = self.audit {
            audit.record(AuditEntry::new(
                record.id(),
                record.application_id(),
                AuditEvent::KeyAccess,
                "proof token verified",
            ))?;
        }
        Ok(record)
    }

    fn resolve(&self, token: &str, now: DateTime<Utc>) -> LicenseResult<KeyRecord> {
        let resolved: RefCell<Option<KeyRecord>> = RefCell::new(None);

        let lookup = |hint: KeyId| -> LicenseResult<Secret> {
            debug!(key_id = %hint, "Resolving secret for proof token");
            let record = self.repository.fetch_key(hint)?;
            let secret = record.secret().clone();
            *resolved.borrow_mut() = Some(record);
            Ok(secret)
        };
        let claims = token::decode(token, &lookup, now)?;

        let record = resolved
            .into_inner()
            .ok_or_else(|| LicenseError::LookupFailed("no key resolved".to_string()))?;

        if record.id() != claims.key_id {
            return Err(LicenseError::KeyMismatch {
                claimed: claims.key_id,
                hint: record.id(),
            });
        }
        if record.application_id() != claims.application_id {
            return Err(LicenseError::ApplicationMismatch {
                claimed: claims.application_id,
                actual: record.application_id(),
            });
        }

        debug!(
            key_id = %record.id(),
            application_id = %record.application_id(),
            "Proof token verified"
        );
        Ok(record)
    }
}

impl<R: ?Sized> std::fmt::Debug for KeyVerifier<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVerifier")
            .field("audited", &self.audit.is_some())
            .finish_non_exhaustive()
    }
}
