//! In-memory staged-change tracker shared by session implementations.
//!
//! # Invariants
//! - Entries are keyed by `(kind, key)`; one tracked record per key.
//! - Stored entries are never `Detached`; detaching removes the entry.
//! - `mark_saved` is only called after the engine accepted the whole batch.

use super::{EntryState, Tracked};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) state: EntryState,
    pub(crate) payload: Value,
    pub(crate) tenant: Option<String>,
    pub(crate) soft_deleted: bool,
}

/// Change tracker implementing the per-record state machine.
///
/// BTreeMap keeps iteration (and therefore the save apply order)
/// deterministic: sorted by kind, then key.
#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    entries: BTreeMap<(&'static str, String), Entry>,
}

impl ChangeTracker {
    pub(crate) fn entry(&self, kind: &'static str, key: &str) -> Option<&Entry> {
        self.entries.get(&(kind, key.to_string()))
    }

    pub(crate) fn state_of(&self, kind: &'static str, key: &str) -> EntryState {
        self.entry(kind, key)
            .map_or(EntryState::Detached, |entry| entry.state)
    }

    /// Stages an insertion. Re-adding a tracked key overwrites the staged
    /// payload and forces the state to `Added`; a conflicting durable row
    /// surfaces as an engine error at save time, not here.
    pub(crate) fn stage_add(
        &mut self,
        kind: &'static str,
        key: String,
        payload: Value,
        tenant: Option<String>,
        soft_deleted: bool,
    ) -> Tracked {
        self.put(kind, key, EntryState::Added, payload, tenant, soft_deleted)
    }

    /// Stages a whole-record update. A record staged `Added` keeps that state
    /// with a refreshed payload; anything else (including an untracked record
    /// attached by key) becomes `Modified`.
    pub(crate) fn stage_update(
        &mut self,
        kind: &'static str,
        key: String,
        payload: Value,
        tenant: Option<String>,
        soft_deleted: bool,
    ) -> Tracked {
        let state = match self.state_of(kind, &key) {
            EntryState::Added => EntryState::Added,
            _ => EntryState::Modified,
        };
        self.put(kind, key, state, payload, tenant, soft_deleted)
    }

    /// Stages a deletion. A record staged `Added` was never durable, so it is
    /// detached instead of deleted.
    pub(crate) fn stage_remove(
        &mut self,
        kind: &'static str,
        key: String,
        payload: Value,
        tenant: Option<String>,
        soft_deleted: bool,
    ) -> Tracked {
        if self.state_of(kind, &key) == EntryState::Added {
            self.entries.remove(&(kind, key.clone()));
            return Tracked {
                kind,
                key,
                state: EntryState::Detached,
            };
        }
        self.put(kind, key, EntryState::Deleted, payload, tenant, soft_deleted)
    }

    /// Attaches a record read from durable storage as `Unchanged`, so later
    /// identity lookups resolve from memory. Existing entries win.
    pub(crate) fn attach_clean(
        &mut self,
        kind: &'static str,
        key: String,
        payload: Value,
        tenant: Option<String>,
        soft_deleted: bool,
    ) {
        self.entries
            .entry((kind, key))
            .or_insert_with(|| Entry {
                state: EntryState::Unchanged,
                payload,
                tenant,
                soft_deleted,
            });
    }

    /// Entries with pending work, in deterministic order.
    pub(crate) fn pending(
        &self,
    ) -> impl Iterator<Item = (&(&'static str, String), &Entry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state != EntryState::Unchanged)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending().count()
    }

    /// Transitions entries after a fully accepted save: `Added` and
    /// `Modified` become `Unchanged`, `Deleted` entries are purged.
    pub(crate) fn mark_saved(&mut self) {
        self.entries
            .retain(|_, entry| entry.state != EntryState::Deleted);
        for entry in self.entries.values_mut() {
            entry.state = EntryState::Unchanged;
        }
    }

    fn put(
        &mut self,
        kind: &'static str,
        key: String,
        state: EntryState,
        payload: Value,
        tenant: Option<String>,
        soft_deleted: bool,
    ) -> Tracked {
        let tracked = Tracked {
            kind,
            key: key.clone(),
            state,
        };
        self.entries.insert(
            (kind, key),
            Entry {
                state,
                payload,
                tenant,
                soft_deleted,
            },
        );
        tracked
    }
}

#[cfg(test)]
mod tests {
    use super::ChangeTracker;
    use crate::session::EntryState;
    use serde_json::json;

    const KIND: &str = "widgets";

    fn stage(tracker: &mut ChangeTracker, op: &str, key: &str) -> EntryState {
        let payload = json!({ "id": key });
        match op {
            "add" => tracker.stage_add(KIND, key.to_string(), payload, None, false),
            "update" => tracker.stage_update(KIND, key.to_string(), payload, None, false),
            "remove" => tracker.stage_remove(KIND, key.to_string(), payload, None, false),
            other => panic!("unknown op {other}"),
        }
        .state
    }

    #[test]
    fn untracked_records_are_detached() {
        let tracker = ChangeTracker::default();
        assert_eq!(tracker.state_of(KIND, "w1"), EntryState::Detached);
    }

    #[test]
    fn add_stages_added_and_update_keeps_it_added() {
        let mut tracker = ChangeTracker::default();
        assert_eq!(stage(&mut tracker, "add", "w1"), EntryState::Added);
        assert_eq!(stage(&mut tracker, "update", "w1"), EntryState::Added);
        assert_eq!(tracker.state_of(KIND, "w1"), EntryState::Added);
    }

    #[test]
    fn update_attaches_untracked_records_as_modified() {
        let mut tracker = ChangeTracker::default();
        assert_eq!(stage(&mut tracker, "update", "w1"), EntryState::Modified);
    }

    #[test]
    fn remove_on_staged_add_detaches() {
        let mut tracker = ChangeTracker::default();
        stage(&mut tracker, "add", "w1");
        assert_eq!(stage(&mut tracker, "remove", "w1"), EntryState::Detached);
        assert_eq!(tracker.state_of(KIND, "w1"), EntryState::Detached);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn remove_on_clean_record_stages_deleted() {
        let mut tracker = ChangeTracker::default();
        tracker.attach_clean(KIND, "w1".to_string(), json!({ "id": "w1" }), None, false);
        assert_eq!(stage(&mut tracker, "remove", "w1"), EntryState::Deleted);
    }

    #[test]
    fn mark_saved_settles_added_and_modified_and_purges_deleted() {
        let mut tracker = ChangeTracker::default();
        stage(&mut tracker, "add", "w1");
        tracker.attach_clean(KIND, "w2".to_string(), json!({ "id": "w2" }), None, false);
        stage(&mut tracker, "update", "w2");
        tracker.attach_clean(KIND, "w3".to_string(), json!({ "id": "w3" }), None, false);
        stage(&mut tracker, "remove", "w3");
        assert_eq!(tracker.pending_count(), 3);

        tracker.mark_saved();

        assert_eq!(tracker.state_of(KIND, "w1"), EntryState::Unchanged);
        assert_eq!(tracker.state_of(KIND, "w2"), EntryState::Unchanged);
        assert_eq!(tracker.state_of(KIND, "w3"), EntryState::Detached);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn attach_clean_never_overwrites_staged_work() {
        let mut tracker = ChangeTracker::default();
        stage(&mut tracker, "add", "w1");
        tracker.attach_clean(KIND, "w1".to_string(), json!({ "id": "stale" }), None, false);
        assert_eq!(tracker.state_of(KIND, "w1"), EntryState::Added);
    }

    #[test]
    fn pending_iterates_in_kind_then_key_order() {
        let mut tracker = ChangeTracker::default();
        stage(&mut tracker, "add", "w2");
        stage(&mut tracker, "add", "w1");
        let keys: Vec<&str> = tracker
            .pending()
            .map(|((_, key), _)| key.as_str())
            .collect();
        assert_eq!(keys, vec!["w1", "w2"]);
    }
}
