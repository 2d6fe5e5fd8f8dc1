//! License key issuance and device activation for keyserv.
//!
//! This crate handles:
//! - Cutting keys bound to an application, each with its own random secret
//! - Verifying HMAC-signed proof tokens that show possession of a key's secret
//! - Binding a bounded number of devices to each key
//!
//! # Protocol
//!
//! A client holds its key's id and secret (delivered at purchase time) and
//! signs a short-lived proof token claiming `(application, key, expiry)`.
//! The server resolves the secret through the token's `kid` hint, verifies
//! the signature, then checks the claims against the stored key record.
//! Secrets never travel back to the client.
//!
//! # Collaborators
//!
//! Storage is injected through the traits in [`repository`]. `keyserv-storage`
//! provides an in-memory implementation.

pub mod audit;
mod cutter;
mod device;
mod error;
mod key;
pub mod repository;
mod secret;
pub mod token;
mod verifier;

pub use audit::{AuditEntry, AuditEvent, AuditLog};
pub use cutter::{Application, CutOptions, KeyCutter, KeyCutterConfig, MIN_SECRET_SIZE};
pub use device::DeviceFingerprint;
pub use error::{LicenseError, LicenseResult, VERIFICATION_FAILED};
pub use key::{Activation, KeyRecord, KeyRecordParts, KeyStatus, KeySummary};
pub use repository::{ApplicationRepository, KeyIdAllocator, KeyRepository};
pub use secret::{OsSecretGenerator, Secret, SecretGenerator};
pub use token::{ProofClaims, SecretLookup};
pub use verifier::KeyVerifier;
