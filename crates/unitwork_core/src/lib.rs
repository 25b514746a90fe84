//! Generic data-access core: typed repositories composed under a unit of
//! work.
//!
//! Callers construct a session, wrap it in a [`UnitOfWork`], obtain a
//! [`Repository`] per entity kind, stage changes through them, and flush
//! everything with one atomic `save_changes`. Staged work is never durable
//! until that call succeeds.

pub mod entity;
pub mod logging;
pub mod repo;
pub mod session;
pub mod uow;

pub use entity::Entity;
pub use logging::{default_log_level, init_logging, logging_status};
pub use repo::entity_repo::{RepoError, RepoResult, Repository};
pub use session::{
    EntryState, Query, Session, SessionOptions, SqliteSession, SqliteTransaction, StoreError,
    StoreResult, Tracked, Transaction,
};
pub use uow::UnitOfWork;
