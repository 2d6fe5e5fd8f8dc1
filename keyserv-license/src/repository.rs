//! Collaborator interfaces supplied by the storage layer.
//!
//! Components receive the narrowest of these traits they need at
//! construction time. There is no process-wide database handle.

use crate::cutter::Application;
use crate::error::LicenseResult;
use crate::key::{Activation, KeyRecord};
use keyserv_types::{ApplicationId, KeyId};

/// Key lookup and persistence.
pub trait KeyRepository {
    /// Fetches a key by id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LicenseError::KeyNotFound`] if the key does not exist.
    fn fetch_key(&self, id: KeyId) -> LicenseResult<KeyRecord>;

    /// Inserts a newly cut key.
    ///
    /// Stored keys are never overwritten wholesale; later changes go through
    /// per-key operations such as [`KeyRepository::activate`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::LicenseError::KeyExists`] if the id is already taken.
    fn save_key(&self, key: &KeyRecord) -> LicenseResult<()>;

    /// Binds a device to a key and returns the bound activation.
    ///
    /// Implementations must serialize this call per key: the checks in
    /// [`KeyRecord::activate`] and the append it performs form one critical
    /// section.
    fn activate(&self, id: KeyId, activation: Activation) -> LicenseResult<Activation>;

    /// Unbinds a device from a key and returns the removed activation.
    fn deactivate(&self, id: KeyId, identifier: &str) -> LicenseResult<Activation>;
}

/// Application lookup and persistence.
pub trait ApplicationRepository {
    /// Fetches an application by id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::LicenseError::ApplicationNotFound`] if it does not exist.
    fn fetch_application(&self, id: ApplicationId) -> LicenseResult<Application>;

    /// Inserts a new application or replaces an existing one.
    fn save_application(&self, application: &Application) -> LicenseResult<()>;
}

/// Source of fresh key identifiers.
pub trait KeyIdAllocator {
    /// Returns an id no other key has been given.
    fn next_key_id(&self) -> LicenseResult<KeyId>;
}

impl<T: KeyRepository + ?Sized> KeyRepository for &T {
    fn fetch_key(&self, id: KeyId) -> LicenseResult<KeyRecord> {
        (**self).fetch_key(id)
    }

    fn save_key(&self, key: &KeyRecord) -> LicenseResult<()> {
        (**self).save_key(key)
    }

    fn activate(&self, id: KeyId, activation: Activation) -> LicenseResult<Activation> {
        (**self).activate(id, activation)
    }

    fn deactivate(&self, id: KeyId, identifier: &str) -> LicenseResult<Activation> {
        (**self).deactivate(id, identifier)
    }
}

impl<T: KeyIdAllocator + ?Sized> KeyIdAllocator for &T {
    fn next_key_id(&self) -> LicenseResult<KeyId> {
        (**self).next_key_id()
    }
}
