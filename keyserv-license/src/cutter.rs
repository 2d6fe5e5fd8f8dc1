//! Cutting new license keys.
//!
//! A [`KeyCutter`] binds a fresh key to an application and gives it a new
//! random secret. Construction is all-or-nothing: if the secret cannot be
//! generated no id is allocated and no record is returned.

use crate::error::{LicenseError, LicenseResult};
use crate::key::{KeyRecord, KeyStatus};
use crate::repository::KeyIdAllocator;
use crate::secret::{OsSecretGenerator, SecretGenerator};
use keyserv_types::ApplicationId;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Smallest secret size accepted by [`KeyCutterConfig::validate`].
pub const MIN_SECRET_SIZE: usize = 16;

/// An application (tenant) that keys are cut for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    /// Shown to end users when activation fails.
    pub support_message: Option<String>,
}

impl Application {
    #[must_use]
    pub fn new(id: ApplicationId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            support_message: None,
        }
    }

    #[must_use]
    pub fn with_support_message(mut self, message: impl Into<String>) -> Self {
        self.support_message = Some(message.into());
        self
    }
}

/// Configuration for cutting keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyCutterConfig {
    /// Size of each key's HMAC secret in bytes.
    pub secret_size: usize,
    /// Device cap for keys cut without an explicit one.
    pub default_max_activations: u32,
    /// Status for keys cut without an explicit one.
    pub default_status: KeyStatus,
}

impl Default for KeyCutterConfig {
    fn default() -> Self {
        Self {
            secret_size: 64,
            default_max_activations: 1,
            default_status: KeyStatus::Active,
        }
    }
}

impl KeyCutterConfig {
    /// Parses and validates a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> LicenseResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.secret_size < MIN_SECRET_SIZE {
            return Err(LicenseError::InvalidConfig(format!(
                "secret_size must be at least {MIN_SECRET_SIZE} bytes, got {}",
                self.secret_size
            )));
        }
        Ok(())
    }
}

/// Per-key overrides for [`KeyCutter::cut_with`].
#[derive(Debug, Clone, Default)]
pub struct CutOptions {
    pub max_activations: Option<u32>,
    pub status: Option<KeyStatus>,
    pub memo: Option<String>,
}

/// Creates new keys.
#[derive(Debug)]
pub struct KeyCutter<A, G = OsSecretGenerator> {
    config: KeyCutterConfig,
    ids: A,
    generator: G,
}

impl<A: KeyIdAllocator> KeyCutter<A> {
    /// Creates a cutter that draws secrets from the OS random source.
    pub fn new(config: KeyCutterConfig, ids: A) -> LicenseResult<Self> {
        Self::with_generator(config, ids, OsSecretGenerator)
    }
}

impl<A: KeyIdAllocator, G: SecretGenerator> KeyCutter<A, G> {
    /// Creates a cutter with a custom secret source.
    pub fn with_generator(config: KeyCutterConfig, ids: A, generator: G) -> LicenseResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ids,
            generator,
        })
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &KeyCutterConfig {
        &self.config
    }

    /// Cuts a key for `application` using the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::Entropy`] if no secret could be generated.
    pub fn cut(&self, application: &Application) -> LicenseResult<KeyRecord> {
        self.cut_with(application, CutOptions::default())
    }

    /// Cuts a key for `application`, overriding defaults with `options`.
    pub fn cut_with(
        &self,
        application: &Application,
        options: CutOptions,
    ) -> LicenseResult<KeyRecord> {
        let secret = self.generator.generate(self.config.secret_size)?;
        let id = self.ids.next_key_id()?;

        let max_activations = options
            .max_activations
            .unwrap_or(self.config.default_max_activations);
        let status = options.status.unwrap_or(self.config.default_status);

        info!(
            key_id = %id,
            application_id = %application.id,
            max_activations,
            "Cut new license key"
        );

        Ok(KeyRecord::new(
            id,
            application.id,
            status,
            secret,
            max_activations,
            options.memo,
        ))
    }
}
