//! In-memory store implementing every keyserv collaborator trait.

use keyserv_license::{
    Activation, Application, ApplicationRepository, AuditEntry, AuditEvent, AuditLog, KeyIdAllocator,
    KeyRecord, KeyRepository, LicenseError, LicenseResult,
};
use keyserv_types::{ApplicationId, KeyId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

/// Thread-safe in-memory store.
///
/// Each key sits behind its own mutex. [`KeyRepository::activate`] holds that
/// mutex across the capacity and duplicate checks and the append, so
/// concurrent activations of one key are serialized while different keys
/// proceed in parallel.
#[derive(Debug)]
pub struct MemoryStore {
    next_key_id: AtomicU64,
    next_application_id: AtomicU64,
    keys: RwLock<HashMap<KeyId, Arc<Mutex<KeyRecord>>>>,
    applications: RwLock<HashMap<ApplicationId, Application>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store. Ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_key_id: AtomicU64::new(1),
            next_application_id: AtomicU64::new(1),
            keys: RwLock::new(HashMap::new()),
            applications: RwLock::new(HashMap::new()),
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new application under a freshly allocated id.
    pub fn create_application(
        &self,
        name: impl Into<String>,
        support_message: Option<String>,
    ) -> LicenseResult<Application> {
        let id = ApplicationId::new(self.next_application_id.fetch_add(1, Ordering::Relaxed));
        let application = Application {
            id,
            name: name.into(),
            support_message,
        };
        self.save_application(&application)?;
        Ok(application)
    }

    /// Disables a key so it rejects further activations.
    pub fn disable_key(&self, id: KeyId) -> LicenseResult<()> {
        self.modify_key(id, "key was disabled", KeyRecord::disable)
    }

    /// Re-enables a disabled key.
    pub fn enable_key(&self, id: KeyId) -> LicenseResult<()> {
        self.modify_key(id, "key was enabled", KeyRecord::enable)
    }

    /// Replaces the memo on a stored key.
    pub fn set_memo(&self, id: KeyId, memo: Option<String>) -> LicenseResult<()> {
        self.modify_key(id, "memo was updated", |record| record.set_memo(memo))
    }

    /// Returns the number of stored keys.
    pub fn key_count(&self) -> LicenseResult<usize> {
        Ok(read(&self.keys)?.len())
    }

    /// Returns the ids of every key cut for `application_id`.
    pub fn keys_for_application(&self, application_id: ApplicationId) -> LicenseResult<Vec<KeyId>> {
        let keys = read(&self.keys)?;
        let mut ids = Vec::new();
        for slot in keys.values() {
            let record = lock(slot)?;
            if record.application_id() == application_id {
                ids.push(record.id());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn slot(&self, id: KeyId) -> LicenseResult<Arc<Mutex<KeyRecord>>> {
        read(&self.keys)?
            .get(&id)
            .cloned()
            .ok_or(LicenseError::KeyNotFound(id))
    }

    fn modify_key(
        &self,
        id: KeyId,
        detail: &str,
        change: impl FnOnce(&mut KeyRecord),
    ) -> LicenseResult<()> {
        let slot = self.slot(id)?;
        let mut record = lock(&slot)?;
        change(&mut *record);
        info!(key_id = %id, status = ?record.status(), "{detail}");
        self.record(AuditEntry::new(
            id,
            record.application_id(),
            AuditEvent::KeyModified,
            detail,
        ))
    }
}

impl KeyRepository for MemoryStore {
    fn fetch_key(&self, id: KeyId) -> LicenseResult<KeyRecord> {
        let slot = self.slot(id)?;
        let record = lock(&slot)?.clone();
        Ok(record)
    }

    fn save_key(&self, key: &KeyRecord) -> LicenseResult<()> {
        let mut keys = write(&self.keys)?;
        if keys.contains_key(&key.id()) {
            warn!(key_id = %key.id(), "Refusing to overwrite stored key");
            return Err(LicenseError::KeyExists(key.id()));
        }
        keys.insert(key.id(), Arc::new(Mutex::new(key.clone())));
        self.next_key_id
            .fetch_max(key.id().get().saturating_add(1), Ordering::Relaxed);
        drop(keys);

        self.record(AuditEntry::new(
            key.id(),
            key.application_id(),
            AuditEvent::KeyCreated,
            format!("key saved with {} activation(s) allowed", key.max_activations()),
        ))
    }

    fn activate(&self, id: KeyId, activation: Activation) -> LicenseResult<Activation> {
        let slot = self.slot(id)?;
        let mut record = lock(&slot)?;
        let identifier = activation.identifier().to_string();

        match record.activate(activation) {
            Ok(()) => {
                let bound = record
                    .activations()
                    .last()
                    .cloned()
                    .ok_or_else(|| LicenseError::Storage("activation was not recorded".to_string()))?;
                info!(
                    key_id = %id,
                    identifier = %identifier,
                    remaining = record.remaining_activations(),
                    "New activation"
                );
                self.record(AuditEntry::new(
                    id,
                    record.application_id(),
                    AuditEvent::Activation,
                    format!("new activation from {identifier}"),
                ))?;
                Ok(bound)
            }
            Err(e) => {
                warn!(key_id = %id, identifier = %identifier, error = %e, "Activation rejected");
                self.record(AuditEntry::new(
                    id,
                    record.application_id(),
                    AuditEvent::FailedActivation,
                    format!("failed activation attempt from {identifier}: {e}"),
                ))?;
                Err(e)
            }
        }
    }

    fn deactivate(&self, id: KeyId, identifier: &str) -> LicenseResult<Activation> {
        let slot = self.slot(id)?;
        let mut record = lock(&slot)?;
        let removed = record.deactivate(identifier)?;
        info!(key_id = %id, identifier = %identifier, "Activation removed");
        self.record(AuditEntry::new(
            id,
            record.application_id(),
            AuditEvent::Deactivation,
            format!("deactivated {identifier}"),
        ))?;
        Ok(removed)
    }
}

impl ApplicationRepository for MemoryStore {
    fn fetch_application(&self, id: ApplicationId) -> LicenseResult<Application> {
        read(&self.applications)?
            .get(&id)
            .cloned()
            .ok_or(LicenseError::ApplicationNotFound(id))
    }

    fn save_application(&self, application: &Application) -> LicenseResult<()> {
        write(&self.applications)?.insert(application.id, application.clone());
        // Keep the counter ahead of explicitly numbered applications.
        self.next_application_id
            .fetch_max(application.id.get().saturating_add(1), Ordering::Relaxed);
        Ok(())
    }
}

impl KeyIdAllocator for MemoryStore {
    fn next_key_id(&self) -> LicenseResult<KeyId> {
        self.next_key_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .map(KeyId::new)
            .map_err(|_| LicenseError::Storage("key id space exhausted".to_string()))
    }
}

impl AuditLog for MemoryStore {
    fn record(&self, entry: AuditEntry) -> LicenseResult<()> {
        lock(&self.audit)?.push(entry);
        Ok(())
    }

    fn entries_for_key(&self, key_id: KeyId) -> LicenseResult<Vec<AuditEntry>> {
        Ok(lock(&self.audit)?
            .iter()
            .filter(|e| e.key_id == key_id)
            .cloned()
            .collect())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> LicenseResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| LicenseError::Storage("lock poisoned".to_string()))
}

fn read<T>(lock: &RwLock<T>) -> LicenseResult<std::sync::RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| LicenseError::Storage("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> LicenseResult<std::sync::RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| LicenseError::Storage("lock poisoned".to_string()))
}
