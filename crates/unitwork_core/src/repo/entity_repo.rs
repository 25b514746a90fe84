//! Generic entity repository over a shared session.
//!
//! # Responsibility
//! - Provide stable CRUD and query APIs for one entity kind.
//! - Return semantic errors (`NotFound`) in addition to transport errors.
//!
//! # Invariants
//! - Staging goes through the session's change tracker; nothing here writes
//!   durable state directly.
//! - `remove_by_key` never stages anything when the key does not resolve.

use crate::entity::Entity;
use crate::session::{Query, Session, StoreError, Tracked};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Key-based removal found no entity for the key.
    NotFound { kind: &'static str, key: String },
    /// Session-layer failure, propagated unchanged.
    Store(StoreError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { kind, key } => write!(f, "{kind} entity not found: {key}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NotFound { .. } => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Typed CRUD/query façade for entity kind `T` against a shared session.
///
/// Carries no state of its own, so a unit of work can hand out any number of
/// repositories over the same session; their staged changes flush together.
pub struct Repository<'s, S: Session, T: Entity> {
    session: &'s S,
    _entity: PhantomData<fn() -> T>,
}

impl<'s, S: Session, T: Entity> Repository<'s, S, T> {
    pub fn new(session: &'s S) -> Self {
        Self {
            session,
            _entity: PhantomData,
        }
    }

    /// Fetches the entity with the given primary key.
    ///
    /// Resolves from the session's tracked state before durable storage; a
    /// miss is `Ok(None)`.
    pub fn get_by_key(&self, key: &T::Key) -> RepoResult<Option<T>> {
        Ok(self.session.find_by_key(key)?)
    }

    /// Fetches the first entity satisfying `predicate`, in engine scan
    /// order. A miss is `Ok(None)`.
    pub fn get_one(&self, predicate: impl Fn(&T) -> bool) -> RepoResult<Option<T>> {
        Ok(self
            .session
            .scan::<T>()?
            .into_iter()
            .find(|entity| predicate(entity)))
    }

    /// Eagerly materializes every visible entity of this kind.
    pub fn get_all(&self) -> RepoResult<Vec<T>> {
        Ok(self.session.scan()?)
    }

    /// Returns a lazy query handle for caller-side composition.
    pub fn get_query(&self) -> Query<'s, S, T> {
        self.session.query()
    }

    /// Stages an entity for insertion.
    pub fn add(&self, entity: &T) -> RepoResult<Tracked> {
        Ok(self.session.add(entity)?)
    }

    /// Stages several entities for insertion.
    pub fn add_range(&self, entities: &[T]) -> RepoResult<Vec<Tracked>> {
        Ok(self.session.add_range(entities)?)
    }

    /// Stages a whole-record update: every persisted field is written on
    /// save, not a diff against a previous snapshot. Untracked entities are
    /// attached by key.
    pub fn update(&self, entity: &T) -> RepoResult<Tracked> {
        Ok(self.session.update(entity)?)
    }

    /// Stages an entity for deletion.
    pub fn remove(&self, entity: &T) -> RepoResult<Tracked> {
        Ok(self.session.remove(entity)?)
    }

    /// Stages several entities for deletion.
    pub fn remove_range(&self, entities: &[T]) -> RepoResult<Vec<Tracked>> {
        Ok(self.session.remove_range(entities)?)
    }

    /// Looks the key up and stages the found entity for deletion.
    ///
    /// # Errors
    /// - `RepoError::NotFound` when no entity has this key; staged state is
    ///   left untouched in that case.
    pub fn remove_by_key(&self, key: &T::Key) -> RepoResult<Tracked> {
        match self.session.find_by_key::<T>(key)? {
            Some(entity) => Ok(self.session.remove(&entity)?),
            None => Err(RepoError::NotFound {
                kind: T::KIND,
                key: key.to_string(),
            }),
        }
    }
}
