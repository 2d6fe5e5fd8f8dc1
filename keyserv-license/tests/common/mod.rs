//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use keyserv_license::{
    Activation, Application, KeyCutter, KeyCutterConfig, KeyIdAllocator, KeyRecord, KeyRepository,
    LicenseError, LicenseResult, ProofClaims, Secret, SecretGenerator, token,
};
use keyserv_types::{ApplicationId, KeyId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// Routes crate logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("keyserv_license=debug")
        .try_init();
}

/// Sequential key ids starting at 1.
#[derive(Default)]
pub struct CountingIds {
    next: Cell<u64>,
}

impl CountingIds {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Cell::new(first),
        }
    }

    pub fn issued(&self) -> u64 {
        self.next.get()
    }
}

impl KeyIdAllocator for CountingIds {
    fn next_key_id(&self) -> LicenseResult<KeyId> {
        let id = self.next.get().max(1);
        self.next.set(id + 1);
        Ok(KeyId::new(id))
    }
}

/// A random source that always fails.
pub struct BrokenEntropy;

impl SecretGenerator for BrokenEntropy {
    fn generate(&self, _size: usize) -> LicenseResult<Secret> {
        Err(LicenseError::Entropy("device not ready".into()))
    }
}

/// Single-threaded key repository that counts lookups.
#[derive(Default)]
pub struct FakeKeys {
    keys: RefCell<HashMap<KeyId, KeyRecord>>,
    pub fetches: Cell<usize>,
}

impl FakeKeys {
    pub fn with(records: impl IntoIterator<Item = KeyRecord>) -> Self {
        let repo = Self::default();
        for record in records {
            repo.save_key(&record).unwrap();
        }
        repo
    }
}

impl KeyRepository for FakeKeys {
    fn fetch_key(&self, id: KeyId) -> LicenseResult<KeyRecord> {
        self.fetches.set(self.fetches.get() + 1);
        self.keys
            .borrow()
            .get(&id)
            .cloned()
            .ok_or(LicenseError::KeyNotFound(id))
    }

    fn save_key(&self, key: &KeyRecord) -> LicenseResult<()> {
        let mut keys = self.keys.borrow_mut();
        if keys.contains_key(&key.id()) {
            return Err(LicenseError::KeyExists(key.id()));
        }
        keys.insert(key.id(), key.clone());
        Ok(())
    }

    fn activate(&self, id: KeyId, activation: Activation) -> LicenseResult<Activation> {
        let mut keys = self.keys.borrow_mut();
        let record = keys.get_mut(&id).ok_or(LicenseError::KeyNotFound(id))?;
        record.activate(activation)?;
        Ok(record.activations().last().cloned().unwrap())
    }

    fn deactivate(&self, id: KeyId, identifier: &str) -> LicenseResult<Activation> {
        let mut keys = self.keys.borrow_mut();
        let record = keys.get_mut(&id).ok_or(LicenseError::KeyNotFound(id))?;
        record.deactivate(identifier)
    }
}

pub fn test_application(id: u64) -> Application {
    Application::new(ApplicationId::new(id), "Test Application")
        .with_support_message("Contact Us at 555-555-5555")
}

/// Cuts a key for application `app_id` allowing `max` devices.
pub fn cut_key(app_id: u64, max: u32) -> KeyRecord {
    let config = KeyCutterConfig {
        default_max_activations: max,
        ..KeyCutterConfig::default()
    };
    let cutter = KeyCutter::new(config, CountingIds::default()).unwrap();
    cutter.cut(&test_application(app_id)).unwrap()
}

/// Cuts a key with a specific id.
pub fn cut_key_with_id(id: u64, app_id: u64, max: u32) -> KeyRecord {
    let config = KeyCutterConfig {
        default_max_activations: max,
        ..KeyCutterConfig::default()
    };
    let cutter = KeyCutter::new(config, CountingIds::starting_at(id)).unwrap();
    cutter.cut(&test_application(app_id)).unwrap()
}

/// Claims for `key` expiring `secs` seconds from now (negative for the past).
pub fn claims_for(key: &KeyRecord, secs: i64) -> ProofClaims {
    ProofClaims::new(
        key.application_id(),
        key.id(),
        Utc::now() + Duration::seconds(secs),
    )
}

/// A token a legitimate client of `key` would send.
pub fn client_token(key: &KeyRecord) -> String {
    token::encode(&claims_for(key, 300), key.secret()).unwrap()
}
