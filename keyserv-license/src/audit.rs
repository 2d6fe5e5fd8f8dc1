//! Audit trail of key lifecycle and activation events.

use crate::error::LicenseResult;
use chrono::{DateTime, Utc};
use keyserv_types::{ApplicationId, KeyId};
use serde::{Deserialize, Serialize};

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    KeyCreated,
    KeyModified,
    KeyAccess,
    Activation,
    FailedActivation,
    Deactivation,
}

/// One audit log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub key_id: KeyId,
    pub application_id: ApplicationId,
    pub event: AuditEvent,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    #[must_use]
    pub fn new(
        key_id: KeyId,
        application_id: ApplicationId,
        event: AuditEvent,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            key_id,
            application_id,
            event,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit sink.
pub trait AuditLog {
    fn record(&self, entry: AuditEntry) -> LicenseResult<()>;

    /// Returns the entries for a key, oldest first.
    fn entries_for_key(&self, key_id: KeyId) -> LicenseResult<Vec<AuditEntry>>;
}
