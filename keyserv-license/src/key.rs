//! License key records and the device-activation ledger.
//!
//! A [`KeyRecord`] owns its secret and the set of devices bound to it. The
//! number of bound devices never exceeds `max_activations`; the cap is
//! enforced when an activation is inserted.
//!
//! `activate` is not safe to call concurrently for the same key. Callers must
//! hold a per-key serialization boundary (a lock, or a transactional
//! read-modify-write in storage) across the whole call, otherwise two devices
//! can both pass the capacity check.

use crate::error::{LicenseError, LicenseResult};
use crate::secret::Secret;
use chrono::{DateTime, Utc};
use keyserv_types::{ActivationId, ApplicationId, KeyId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Whether a key may be used to activate devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Activations are permitted.
    #[default]
    Active,
    /// Activations are rejected.
    Inactive,
}

/// A device bound to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    id: ActivationId,
    key_id: Option<KeyId>,
    identifier: String,
    activated_at: DateTime<Utc>,
}

impl Activation {
    /// Creates an unbound activation for a device fingerprint.
    #[must_use]
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            id: ActivationId::new(),
            key_id: None,
            identifier: identifier.into(),
            activated_at: Utc::now(),
        }
    }

    /// Rebuilds a persisted activation. It is bound again by [`KeyRecord::restore`].
    #[must_use]
    pub fn restore(id: ActivationId, identifier: String, activated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            key_id: None,
            identifier,
            activated_at,
        }
    }

    /// Returns the activation id.
    #[must_use]
    pub fn id(&self) -> ActivationId {
        self.id
    }

    /// Returns the owning key, or `None` if not yet bound.
    #[must_use]
    pub fn key_id(&self) -> Option<KeyId> {
        self.key_id
    }

    /// Returns the device identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns when the activation was created.
    #[must_use]
    pub fn activated_at(&self) -> DateTime<Utc> {
        self.activated_at
    }
}

/// Persisted state of a key, used to rebuild a [`KeyRecord`].
#[derive(Debug, Clone)]
pub struct KeyRecordParts {
    pub id: KeyId,
    pub application_id: ApplicationId,
    pub status: KeyStatus,
    pub secret: Secret,
    pub max_activations: u32,
    pub activations: Vec<Activation>,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A license key bound to one application.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    id: KeyId,
    application_id: ApplicationId,
    status: KeyStatus,
    secret: Secret,
    max_activations: u32,
    activations: Vec<Activation>,
    memo: Option<String>,
    created_at: DateTime<Utc>,
}

impl KeyRecord {
    pub(crate) fn new(
        id: KeyId,
        application_id: ApplicationId,
        status: KeyStatus,
        secret: Secret,
        max_activations: u32,
        memo: Option<String>,
    ) -> Self {
        Self {
            id,
            application_id,
            status,
            secret,
            max_activations,
            activations: Vec::new(),
            memo,
            created_at: Utc::now(),
        }
    }

    /// Rebuilds a record from persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Storage`] if the stored activations exceed
    /// the cap, contain a duplicate identifier, or point at another key.
    pub fn restore(parts: KeyRecordParts) -> LicenseResult<Self> {
        if parts.activations.len() > parts.max_activations as usize {
            return Err(LicenseError::Storage(format!(
                "key {} holds {} activations but allows {}",
                parts.id,
                parts.activations.len(),
                parts.max_activations
            )));
        }

        let mut seen = HashSet::new();
        for activation in &parts.activations {
            if !seen.insert(activation.identifier.as_str()) {
                return Err(LicenseError::Storage(format!(
                    "key {} holds duplicate activation {}",
                    parts.id, activation.identifier
                )));
            }
            if activation.key_id.is_some_and(|k| k != parts.id) {
                return Err(LicenseError::Storage(format!(
                    "activation {} belongs to another key",
                    activation.id
                )));
            }
        }

        let id = parts.id;
        let activations = parts
            .activations
            .into_iter()
            .map(|mut a| {
                a.key_id = Some(id);
                a
            })
            .collect();

        Ok(Self {
            id,
            application_id: parts.application_id,
            status: parts.status,
            secret: parts.secret,
            max_activations: parts.max_activations,
            activations,
            memo: parts.memo,
            created_at: parts.created_at,
        })
    }

    /// Binds a device to this key.
    ///
    /// Checks run in a fixed order and stop at the first failure:
    /// status, then capacity, then duplicate identifier. A device that is
    /// already bound to a full key therefore gets `ActivationLimitExceeded`.
    ///
    /// # Errors
    ///
    /// - [`LicenseError::KeyInactive`] if the key is disabled
    /// - [`LicenseError::ActivationLimitExceeded`] if the key is full
    /// - [`LicenseError::AlreadyActivated`] if the identifier is already bound
    pub fn activate(&mut self, mut activation: Activation) -> LicenseResult<()> {
        if self.status != KeyStatus::Active {
            return Err(LicenseError::KeyInactive);
        }
        if self.activations.len() >= self.max_activations as usize {
            return Err(LicenseError::ActivationLimitExceeded(self.max_activations));
        }
        if self.is_activated(&activation.identifier) {
            return Err(LicenseError::AlreadyActivated(activation.identifier));
        }

        activation.key_id = Some(self.id);
        self.activations.push(activation);
        Ok(())
    }

    /// Removes the activation for `identifier` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::ActivationNotFound`] if no such device is bound.
    pub fn deactivate(&mut self, identifier: &str) -> LicenseResult<Activation> {
        let index = self
            .activations
            .iter()
            .position(|a| a.identifier == identifier)
            .ok_or_else(|| LicenseError::ActivationNotFound(identifier.to_string()))?;
        Ok(self.activations.remove(index))
    }

    /// Disables the key. Existing activations remain bound.
    pub fn disable(&mut self) {
        self.status = KeyStatus::Inactive;
    }

    /// Re-enables the key.
    pub fn enable(&mut self) {
        self.status = KeyStatus::Active;
    }

    /// Replaces the key's free-form memo.
    pub fn set_memo(&mut self, memo: Option<String>) {
        self.memo = memo;
    }

    /// Returns true if `identifier` is bound to this key.
    #[must_use]
    pub fn is_activated(&self, identifier: &str) -> bool {
        self.activations.iter().any(|a| a.identifier == identifier)
    }

    /// Returns how many more devices may be bound.
    #[must_use]
    pub fn remaining_activations(&self) -> u32 {
        let used = u32::try_from(self.activations.len()).unwrap_or(u32::MAX);
        self.max_activations.saturating_sub(used)
    }

    /// Returns the key id.
    #[must_use]
    pub fn id(&self) -> KeyId {
        self.id
    }

    /// Returns the owning application. Fixed when the key is cut.
    #[must_use]
    pub fn application_id(&self) -> ApplicationId {
        self.application_id
    }

    /// Returns whether the key accepts new activations.
    #[must_use]
    pub fn status(&self) -> KeyStatus {
        self.status
    }

    /// Returns the HMAC secret. Never send this to a client.
    #[must_use]
    pub fn secret(&self) -> &Secret {
        &self.secret
    }

    /// Returns the maximum number of bound devices.
    #[must_use]
    pub fn max_activations(&self) -> u32 {
        self.max_activations
    }

    /// Returns the bound devices in activation order.
    #[must_use]
    pub fn activations(&self) -> &[Activation] {
        &self.activations
    }

    /// Returns the operator memo, if any.
    #[must_use]
    pub fn memo(&self) -> Option<&str> {
        self.memo.as_deref()
    }

    /// Returns when the key was cut.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the client-facing view of this key.
    #[must_use]
    pub fn summary(&self) -> KeySummary {
        KeySummary {
            id: self.id,
            application_id: self.application_id,
            status: self.status,
            max_activations: self.max_activations,
            remaining_activations: self.remaining_activations(),
            activations: self.activations.clone(),
        }
    }
}

/// Serializable view of a key without its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySummary {
    pub id: KeyId,
    pub application_id: ApplicationId,
    pub status: KeyStatus,
    pub max_activations: u32,
    pub remaining_activations: u32,
    pub activations: Vec<Activation>,
}
