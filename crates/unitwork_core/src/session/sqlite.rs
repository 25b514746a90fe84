//! SQLite-backed session implementation.
//!
//! # Responsibility
//! - Open and configure SQLite connections for document-style entity storage.
//! - Execute staged batches atomically and manage explicit transactions.
//!
//! # Invariants
//! - Returned sessions have `foreign_keys=ON` and a bounded busy timeout.
//! - Records live in one `entities` table keyed by `(kind, key)`; payloads
//!   are serialized documents, so no per-entity schema exists to migrate.
//! - `save_changes` runs inside a savepoint and therefore stays atomic both
//!   stand-alone and inside an explicit transaction.

use super::tracker::ChangeTracker;
use super::{EntryState, Session, StoreError, StoreResult, Tracked, Transaction};
use crate::entity::Entity;
use log::{error, info, warn};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::time::{Duration, Instant};

const ENTITIES_TABLE: &str = "entities";
const SAVE_SAVEPOINT: &str = "unitwork_save";

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS entities (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    tenant TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    body TEXT NOT NULL,
    PRIMARY KEY (kind, key)
);";

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Backend(Box::new(value))
    }
}

/// External configuration consumed by the session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Tenant scope: stamped on rows whose entities carry no tenant, and
    /// applied as a read filter (unscoped rows stay visible).
    pub tenant_id: Option<String>,
    /// When true, reads also return soft-deleted records.
    pub include_soft_deleted: bool,
    /// When true, the storage schema is created on open; when false, the
    /// required table's presence is verified instead.
    pub create_schema: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tenant_id: None,
            include_soft_deleted: false,
            create_schema: true,
        }
    }
}

/// Session over one SQLite connection.
///
/// Holds the change tracker for every repository sharing it; confined to one
/// logical caller at a time.
pub struct SqliteSession {
    conn: Connection,
    options: SessionOptions,
    tracker: RefCell<ChangeTracker>,
    tx_active: Cell<bool>,
}

impl SqliteSession {
    /// Opens a file-backed session.
    ///
    /// # Side effects
    /// - Performs connection bootstrap and schema setup or verification.
    /// - Emits `session_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>, options: SessionOptions) -> StoreResult<Self> {
        let started_at = Instant::now();
        info!("event=session_open module=session status=start mode=file");

        match Connection::open(path) {
            Ok(conn) => Self::finish_open(conn, options, "file", started_at),
            Err(err) => {
                error!(
                    "event=session_open module=session status=error mode=file duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Opens an in-memory session, private to this connection.
    ///
    /// # Side effects
    /// - Performs connection bootstrap and schema setup or verification.
    /// - Emits `session_open` logging events with duration and status.
    pub fn open_in_memory(options: SessionOptions) -> StoreResult<Self> {
        let started_at = Instant::now();
        info!("event=session_open module=session status=start mode=memory");

        match Connection::open_in_memory() {
            Ok(conn) => Self::finish_open(conn, options, "memory", started_at),
            Err(err) => {
                error!(
                    "event=session_open module=session status=error mode=memory duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Returns the configuration this session was opened with.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn finish_open(
        conn: Connection,
        options: SessionOptions,
        mode: &str,
        started_at: Instant,
    ) -> StoreResult<Self> {
        match Self::bootstrap(&conn, &options) {
            Ok(()) => {
                info!(
                    "event=session_open module=session status=ok mode={} duration_ms={}",
                    mode,
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    conn,
                    options,
                    tracker: RefCell::new(ChangeTracker::default()),
                    tx_active: Cell::new(false),
                })
            }
            Err(err) => {
                error!(
                    "event=session_open module=session status=error mode={} duration_ms={} error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn bootstrap(conn: &Connection, options: &SessionOptions) -> StoreResult<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_secs(5))?;

        if options.create_schema {
            conn.execute_batch(SCHEMA_SQL)?;
            return Ok(());
        }

        let present: bool = conn.query_row(
            "SELECT EXISTS (
                 SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1
             );",
            [ENTITIES_TABLE],
            |row| row.get(0),
        )?;
        if !present {
            return Err(StoreError::MissingTable(ENTITIES_TABLE));
        }
        Ok(())
    }

    /// Tenant value written to a row: the entity's own, else the session's.
    fn write_tenant<T: Entity>(&self, entity: &T) -> Option<String> {
        entity
            .tenant_id()
            .map(str::to_string)
            .or_else(|| self.options.tenant_id.clone())
    }

    /// Read-filter check shared by the tracked and durable lookup paths.
    fn visible(&self, tenant: Option<&str>, soft_deleted: bool) -> bool {
        if soft_deleted && !self.options.include_soft_deleted {
            return false;
        }
        match (self.options.tenant_id.as_deref(), tenant) {
            (Some(scope), Some(row_tenant)) => scope == row_tenant,
            _ => true,
        }
    }

    fn apply_pending(&self) -> StoreResult<usize> {
        let tracker = self.tracker.borrow();
        let mut affected = 0usize;

        for ((kind, key), entry) in tracker.pending() {
            let kind = *kind;
            match entry.state {
                EntryState::Added => {
                    let body = serde_json::to_string(&entry.payload)?;
                    affected += self.conn.execute(
                        "INSERT INTO entities (kind, key, tenant, is_deleted, body)
                         VALUES (?1, ?2, ?3, ?4, ?5);",
                        params![
                            kind,
                            key,
                            entry.tenant.as_deref(),
                            bool_to_int(entry.soft_deleted),
                            body
                        ],
                    )?;
                }
                EntryState::Modified => {
                    let body = serde_json::to_string(&entry.payload)?;
                    let changed = self.conn.execute(
                        "UPDATE entities
                         SET tenant = ?3, is_deleted = ?4, body = ?5
                         WHERE kind = ?1 AND key = ?2;",
                        params![
                            kind,
                            key,
                            entry.tenant.as_deref(),
                            bool_to_int(entry.soft_deleted),
                            body
                        ],
                    )?;
                    if changed == 0 {
                        return Err(StoreError::MissingRow {
                            kind,
                            key: key.clone(),
                        });
                    }
                    affected += changed;
                }
                EntryState::Deleted => {
                    let changed = self.conn.execute(
                        "DELETE FROM entities WHERE kind = ?1 AND key = ?2;",
                        params![kind, key],
                    )?;
                    if changed == 0 {
                        return Err(StoreError::MissingRow {
                            kind,
                            key: key.clone(),
                        });
                    }
                    affected += changed;
                }
                EntryState::Detached | EntryState::Unchanged => {}
            }
        }

        Ok(affected)
    }
}

impl Session for SqliteSession {
    type Tx<'s>
        = SqliteTransaction<'s>
    where
        Self: 's;

    fn find_by_key<T: Entity>(&self, key: &T::Key) -> StoreResult<Option<T>> {
        let key_text = key.to_string();

        {
            let tracker = self.tracker.borrow();
            if let Some(entry) = tracker.entry(T::KIND, &key_text) {
                if entry.state == EntryState::Deleted
                    || !self.visible(entry.tenant.as_deref(), entry.soft_deleted)
                {
                    return Ok(None);
                }
                let entity: T = serde_json::from_value(entry.payload.clone())?;
                return Ok(Some(entity));
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT body FROM entities
             WHERE kind = ?1 AND key = ?2
               AND (?3 = 1 OR is_deleted = 0)
               AND (?4 IS NULL OR tenant IS NULL OR tenant = ?4);",
        )?;
        let mut rows = stmt.query(params![
            T::KIND,
            key_text,
            bool_to_int(self.options.include_soft_deleted),
            self.options.tenant_id.as_deref(),
        ])?;

        if let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            let payload: Value = serde_json::from_str(&body)?;
            let entity: T = serde_json::from_value(payload.clone())?;
            self.tracker.borrow_mut().attach_clean(
                T::KIND,
                key_text,
                payload,
                entity.tenant_id().map(str::to_string),
                entity.is_soft_deleted(),
            );
            return Ok(Some(entity));
        }

        Ok(None)
    }

    fn scan<T: Entity>(&self) -> StoreResult<Vec<T>> {
        let mut stmt = self.conn.prepare(
            "SELECT body FROM entities
             WHERE kind = ?1
               AND (?2 = 1 OR is_deleted = 0)
               AND (?3 IS NULL OR tenant IS NULL OR tenant = ?3)
             ORDER BY key;",
        )?;
        let mut rows = stmt.query(params![
            T::KIND,
            bool_to_int(self.options.include_soft_deleted),
            self.options.tenant_id.as_deref(),
        ])?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            let body: String = row.get(0)?;
            entities.push(serde_json::from_str(&body)?);
        }
        Ok(entities)
    }

    fn add<T: Entity>(&self, entity: &T) -> StoreResult<Tracked> {
        let payload = serde_json::to_value(entity)?;
        Ok(self.tracker.borrow_mut().stage_add(
            T::KIND,
            entity.key().to_string(),
            payload,
            self.write_tenant(entity),
            entity.is_soft_deleted(),
        ))
    }

    fn update<T: Entity>(&self, entity: &T) -> StoreResult<Tracked> {
        let payload = serde_json::to_value(entity)?;
        Ok(self.tracker.borrow_mut().stage_update(
            T::KIND,
            entity.key().to_string(),
            payload,
            self.write_tenant(entity),
            entity.is_soft_deleted(),
        ))
    }

    fn remove<T: Entity>(&self, entity: &T) -> StoreResult<Tracked> {
        let payload = serde_json::to_value(entity)?;
        Ok(self.tracker.borrow_mut().stage_remove(
            T::KIND,
            entity.key().to_string(),
            payload,
            self.write_tenant(entity),
            entity.is_soft_deleted(),
        ))
    }

    fn tracked_state<T: Entity>(&self, key: &T::Key) -> EntryState {
        self.tracker.borrow().state_of(T::KIND, &key.to_string())
    }

    fn begin_transaction(&self) -> StoreResult<SqliteTransaction<'_>> {
        if self.tx_active.get() {
            return Err(StoreError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.tx_active.set(true);
        info!("event=tx_begin module=session status=ok");
        Ok(SqliteTransaction {
            session: self,
            finished: false,
        })
    }

    fn save_changes(&self) -> StoreResult<usize> {
        let started_at = Instant::now();
        let staged = self.tracker.borrow().pending_count();
        if staged == 0 {
            info!(
                "event=save_changes module=session status=ok staged=0 affected=0 duration_ms={}",
                started_at.elapsed().as_millis()
            );
            return Ok(0);
        }

        self.conn
            .execute_batch(&format!("SAVEPOINT {SAVE_SAVEPOINT};"))?;
        match self.apply_pending() {
            Ok(affected) => {
                self.conn
                    .execute_batch(&format!("RELEASE SAVEPOINT {SAVE_SAVEPOINT};"))?;
                self.tracker.borrow_mut().mark_saved();
                info!(
                    "event=save_changes module=session status=ok staged={} affected={} duration_ms={}",
                    staged,
                    affected,
                    started_at.elapsed().as_millis()
                );
                Ok(affected)
            }
            Err(err) => {
                // Tracker must stay untouched here: the caller corrects the
                // batch and retries against the same staged state.
                let _ = self.conn.execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {SAVE_SAVEPOINT}; RELEASE SAVEPOINT {SAVE_SAVEPOINT};"
                ));
                error!(
                    "event=save_changes module=session status=error staged={} duration_ms={} error={}",
                    staged,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

/// Explicit transaction over a [`SqliteSession`].
///
/// Rolls back on drop unless `commit` or `rollback` resolved it first.
pub struct SqliteTransaction<'s> {
    session: &'s SqliteSession,
    finished: bool,
}

impl Transaction for SqliteTransaction<'_> {
    fn commit(mut self) -> StoreResult<()> {
        self.session.conn.execute_batch("COMMIT;")?;
        self.finished = true;
        self.session.tx_active.set(false);
        info!("event=tx_commit module=session status=ok");
        Ok(())
    }

    fn rollback(mut self) -> StoreResult<()> {
        self.session.conn.execute_batch("ROLLBACK;")?;
        self.finished = true;
        self.session.tx_active.set(false);
        info!("event=tx_rollback module=session status=ok");
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.session.tx_active.set(false);
        match self.session.conn.execute_batch("ROLLBACK;") {
            Ok(()) => warn!("event=tx_rollback module=session status=ok reason=dropped"),
            Err(err) => {
                error!("event=tx_rollback module=session status=error reason=dropped error={err}");
            }
        }
    }
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
