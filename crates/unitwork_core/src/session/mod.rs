//! Persistence session contract and change-tracking primitives.
//!
//! # Responsibility
//! - Define the collaborator contract repositories and units of work depend
//!   on: keyed lookup, eager scans, staging, transactions, atomic save.
//! - Define the per-entry state machine and the session error taxonomy.
//!
//! # Invariants
//! - Staging operations only mutate in-memory tracker state; nothing becomes
//!   durable before `save_changes` succeeds.
//! - `save_changes` is all-or-nothing: a rejected batch leaves durable rows
//!   and tracked state exactly as they were.
//! - At most one explicit transaction is active per session.

use crate::entity::Entity;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod query;
pub mod sqlite;
mod tracker;

pub use query::Query;
pub use sqlite::{SessionOptions, SqliteSession, SqliteTransaction};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a session implementation.
///
/// Engine failures are propagated unchanged inside `Backend`; this layer adds
/// no retries and no translation.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying storage-engine error, surfaced as-is.
    Backend(Box<dyn Error + Send + Sync + 'static>),
    /// Record payload could not be serialized or deserialized.
    Codec(serde_json::Error),
    /// An update or delete reached the engine but matched no durable row.
    MissingRow { kind: &'static str, key: String },
    /// Schema creation is disabled and a required table is absent.
    MissingTable(&'static str),
    /// An explicit transaction is already active on this session.
    TransactionActive,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend(err) => write!(f, "{err}"),
            Self::Codec(err) => write!(f, "record payload codec failure: {err}"),
            Self::MissingRow { kind, key } => {
                write!(f, "no durable {kind} row for key `{key}`")
            }
            Self::MissingTable(table) => {
                write!(f, "required table `{table}` is missing and schema creation is disabled")
            }
            Self::TransactionActive => {
                write!(f, "a transaction is already active on this session")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(&**err),
            Self::Codec(err) => Some(err),
            Self::MissingRow { .. } | Self::MissingTable(_) | Self::TransactionActive => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Session-scoped lifecycle state of one tracked record.
///
/// `Detached` means the session does not track the record at all. A
/// successful save moves `Added` and `Modified` entries to `Unchanged` and
/// purges `Deleted` ones; a failed save moves nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Detached,
    Added,
    Unchanged,
    Modified,
    Deleted,
}

/// Tracking handle returned by staging operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked {
    /// Storage-kind name of the staged record.
    pub kind: &'static str,
    /// Stringified primary key of the staged record.
    pub key: String,
    /// Tracker state after the staging operation.
    pub state: EntryState,
}

/// Explicit transaction handle.
///
/// Both outcomes consume the handle; dropping an unresolved handle must roll
/// back, so scoped acquisition covers every exit path.
pub trait Transaction {
    fn commit(self) -> StoreResult<()>;
    fn rollback(self) -> StoreResult<()>;
}

/// Contract required from the persistence collaborator.
///
/// One session instance is shared by every repository created from the same
/// unit of work, so changes staged through different repositories flush
/// together. Sessions are confined to one logical caller at a time.
pub trait Session {
    /// Explicit transaction handle type.
    type Tx<'s>: Transaction
    where
        Self: 's;

    /// Identity-based lookup for one record.
    ///
    /// Resolves from tracked state before touching durable storage; a record
    /// staged for deletion reads as absent. A miss is `Ok(None)`, never an
    /// error.
    fn find_by_key<T: Entity>(&self, key: &T::Key) -> StoreResult<Option<T>>;

    /// Eagerly materializes every durable record of kind `T`, in engine
    /// order, with the session's read filters applied.
    fn scan<T: Entity>(&self) -> StoreResult<Vec<T>>;

    /// Stages a record for insertion.
    fn add<T: Entity>(&self, entity: &T) -> StoreResult<Tracked>;

    /// Stages a whole-record update: every persisted field is written on
    /// save, regardless of which fields actually changed. Untracked records
    /// are attached by key.
    fn update<T: Entity>(&self, entity: &T) -> StoreResult<Tracked>;

    /// Stages a record for deletion. Removing a staged-but-unsaved insertion
    /// detaches it instead.
    fn remove<T: Entity>(&self, entity: &T) -> StoreResult<Tracked>;

    /// Reports the tracker state for a key (`Detached` when untracked).
    fn tracked_state<T: Entity>(&self, key: &T::Key) -> EntryState;

    /// Begins an explicit transaction.
    ///
    /// # Errors
    /// - `StoreError::TransactionActive` when one is already open.
    fn begin_transaction(&self) -> StoreResult<Self::Tx<'_>>;

    /// Atomically flushes every staged change and returns the affected-row
    /// count. On failure no change becomes durable and the tracker is left
    /// untouched, so the caller may correct and retry.
    fn save_changes(&self) -> StoreResult<usize>;

    /// Stages several records for insertion.
    fn add_range<T: Entity>(&self, entities: &[T]) -> StoreResult<Vec<Tracked>> {
        entities.iter().map(|entity| self.add(entity)).collect()
    }

    /// Stages several records for deletion.
    fn remove_range<T: Entity>(&self, entities: &[T]) -> StoreResult<Vec<Tracked>> {
        entities.iter().map(|entity| self.remove(entity)).collect()
    }

    /// Returns a lazy, composable query handle over kind `T`.
    ///
    /// No storage round-trip happens until the handle is forced.
    fn query<T: Entity>(&self) -> Query<'_, Self, T>
    where
        Self: Sized,
    {
        Query::new(self)
    }
}
