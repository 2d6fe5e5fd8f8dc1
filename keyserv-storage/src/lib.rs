//! Storage backends for keyserv.
//!
//! Implements the collaborator traits from `keyserv-license`:
//! key and application repositories, key id allocation and the audit log.
//! Persistent backends plug in behind the same traits.

mod memory;

pub use memory::MemoryStore;
