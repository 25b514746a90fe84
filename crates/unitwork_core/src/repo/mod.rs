//! Repository layer: per-entity CRUD and query façades.
//!
//! # Responsibility
//! - Give callers a uniform, typed data-access surface per entity kind.
//! - Isolate session staging and lookup details from business orchestration.
//!
//! # Invariants
//! - Lookup misses are `Ok(None)`; the only miss that errors is key-based
//!   removal, which returns a semantic `NotFound`.
//! - Repositories are stateless; every mutable thing lives in the session.

pub mod entity_repo;
