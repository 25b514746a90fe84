//! Entity capability contract.
//!
//! # Responsibility
//! - Declare which domain types are persistable and how they identify
//!   themselves.
//!
//! # Invariants
//! - `KIND` values must be unique per entity type and stable across releases;
//!   they key the storage namespace and the change tracker.
//! - `key()` must return the same value for the lifetime of a record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;

/// Capability contract for types persisted through a repository.
///
/// The serde bounds exist because the session stores records as serialized
/// documents; the key bound exists because keys are stringified for storage
/// addressing and diagnostics. Key non-nullability is carried by the type
/// itself: `Key` is a plain value type, never an `Option`.
pub trait Entity: Serialize + DeserializeOwned {
    /// Primary-key type, chosen by the implementor.
    type Key: Display;

    /// Stable storage-kind name for this entity type.
    const KIND: &'static str;

    /// Returns the record's primary key.
    fn key(&self) -> Self::Key;

    /// Optional tenant identifier carried by the record.
    ///
    /// Records without one inherit the session's configured tenant on write.
    fn tenant_id(&self) -> Option<&str> {
        None
    }

    /// Soft-delete tombstone flag.
    ///
    /// Sessions hide tombstoned rows from reads unless configured otherwise.
    fn is_soft_deleted(&self) -> bool {
        false
    }
}
