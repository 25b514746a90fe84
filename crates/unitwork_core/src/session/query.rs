//! Lazy, composable query handle.
//!
//! # Responsibility
//! - Let callers stack filtering, ordering and paging before any storage
//!   round-trip happens.
//!
//! # Invariants
//! - Construction and combinators perform no I/O; only `fetch`, `first` and
//!   `count` execute against the session.

use super::{Session, StoreResult};
use crate::entity::Entity;
use std::cmp::Ordering;

/// Deferred query over every visible record of kind `T`.
///
/// Predicates and comparators are plain closures over the record type;
/// evaluation happens caller-side after the session materializes the scan.
pub struct Query<'s, S: Session, T: Entity> {
    session: &'s S,
    filters: Vec<Box<dyn Fn(&T) -> bool + 's>>,
    order: Option<Box<dyn Fn(&T, &T) -> Ordering + 's>>,
    skip: usize,
    take: Option<usize>,
}

impl<'s, S: Session, T: Entity> Query<'s, S, T> {
    pub(crate) fn new(session: &'s S) -> Self {
        Self {
            session,
            filters: Vec::new(),
            order: None,
            skip: 0,
            take: None,
        }
    }

    /// Keeps only records matching `predicate`. Filters stack conjunctively.
    pub fn filter(mut self, predicate: impl Fn(&T) -> bool + 's) -> Self {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Sorts the result with `compare` before paging is applied.
    pub fn order_by(mut self, compare: impl Fn(&T, &T) -> Ordering + 's) -> Self {
        self.order = Some(Box::new(compare));
        self
    }

    /// Skips the first `count` records of the (possibly ordered) result.
    pub fn skip(mut self, count: usize) -> Self {
        self.skip = count;
        self
    }

    /// Caps the result at `count` records.
    pub fn take(mut self, count: usize) -> Self {
        self.take = Some(count);
        self
    }

    /// Executes the query and materializes the result.
    pub fn fetch(self) -> StoreResult<Vec<T>> {
        let mut records = self.session.scan::<T>()?;
        records.retain(|record| self.filters.iter().all(|keep| keep(record)));
        if let Some(compare) = &self.order {
            records.sort_by(|a, b| compare(a, b));
        }
        Ok(records
            .into_iter()
            .skip(self.skip)
            .take(self.take.unwrap_or(usize::MAX))
            .collect())
    }

    /// Executes the query and returns its first record, if any.
    pub fn first(self) -> StoreResult<Option<T>> {
        Ok(self.take(1).fetch()?.into_iter().next())
    }

    /// Executes the query and returns the number of matching records.
    pub fn count(self) -> StoreResult<usize> {
        Ok(self.fetch()?.len())
    }
}
