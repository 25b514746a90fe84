//! Unit of work: the transactional boundary over one session.
//!
//! # Responsibility
//! - Own exactly one session and hand out repositories bound to it.
//! - Expose transaction control and the single atomic save entry point.
//!
//! # Invariants
//! - Every repository obtained here shares the owned session, so one
//!   `save_changes` flushes all of their staged work as a unit.
//! - Units of work are passed explicitly; nothing here is ambient or global.

use crate::entity::Entity;
use crate::repo::entity_repo::{RepoResult, Repository};
use crate::session::Session;

/// Single entry point for acquiring repositories and committing work.
///
/// Created once per logical business transaction and confined to one caller
/// at a time, like the session it owns.
pub struct UnitOfWork<S: Session> {
    session: S,
}

impl<S: Session> UnitOfWork<S> {
    /// Takes ownership of the session for this unit of work's lifetime.
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Constructs a repository for entity kind `T` bound to the owned
    /// session. Safe to call any number of times; repositories are stateless.
    pub fn repository<T: Entity>(&self) -> Repository<'_, S, T> {
        Repository::new(&self.session)
    }

    /// Begins an explicit transaction on the owned session.
    ///
    /// The caller resolves the handle via commit or rollback; dropping it
    /// unresolved rolls back.
    pub fn begin_transaction(&self) -> RepoResult<S::Tx<'_>> {
        Ok(self.session.begin_transaction()?)
    }

    /// Flushes all staged changes across every repository sharing the owned
    /// session in one atomic operation.
    ///
    /// Returns the affected-record count. On failure nothing was persisted
    /// and staged state is unchanged, so the caller may correct and retry.
    pub fn save_changes(&self) -> RepoResult<usize> {
        Ok(self.session.save_changes()?)
    }

    /// Borrows the owned session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Consumes the unit of work, releasing the session.
    pub fn into_session(self) -> S {
        self.session
    }
}
