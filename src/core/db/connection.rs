/// Connection Management Module
///
/// A `Connection` owns one native database handle, tracks every statement
/// prepared from it, and is the single place where native status codes are
/// translated into `SqlstepError`s.

use super::lock;
use super::native::{self, Outcome, RawDb};
use super::statement::{Statement, StatementSlot};
use super::{ResultCursor, Value};
use crate::config::ConnectionConfig;
use crate::core::{Result, SqlstepError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Path that opens a private, in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Shared connection state.
///
/// Statements hold an `Arc` to this so they can translate errors and
/// deregister themselves; the native handle itself is released by `close`
/// regardless of how many statements still reference the state.
pub(crate) struct ConnectionInner {
    path: String,
    /// `None` once the connection has been closed
    db: Mutex<Option<RawDb>>,
    /// Live statements, keyed by registration id
    statements: Mutex<HashMap<u64, Weak<StatementSlot>>>,
    next_statement_id: AtomicU64,
}

impl ConnectionInner {
    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    /// Runs `f` against the open handle, or fails with `Disposed`.
    pub(crate) fn with_db<T>(&self, f: impl FnOnce(&RawDb) -> T) -> Result<T> {
        let guard = lock(&self.db);
        match guard.as_ref() {
            Some(db) => Ok(f(db)),
            None => Err(SqlstepError::Disposed("connection")),
        }
    }

    /// Translates a native status: ok/row/done pass, anything else becomes
    /// a `Status` error carrying the engine's current message and, if
    /// given, the SQL.
    ///
    /// The message is read after the fact; failures from this crate's own
    /// calls go through `check_outcome`, which carries the message captured
    /// with the status.
    pub(crate) fn check_status(&self, code: i32, sql: Option<&str>) -> Result<()> {
        if native::is_success(code) {
            return Ok(());
        }

        let message = match lock(&self.db).as_ref() {
            Some(db) => db.errmsg(),
            None => native::error_string(code),
        };
        Err(status_error(code, message, sql))
    }

    /// Translates a status whose message was captured with the call.
    pub(crate) fn check_outcome(&self, outcome: Outcome, sql: Option<&str>) -> Result<()> {
        if native::is_success(outcome.code) {
            return Ok(());
        }

        let message = outcome
            .message
            .unwrap_or_else(|| native::error_string(outcome.code));
        Err(status_error(outcome.code, message, sql))
    }

    pub(crate) fn register(&self, slot: &Arc<StatementSlot>) -> u64 {
        let id = self.next_statement_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.statements).insert(id, Arc::downgrade(slot));
        id
    }

    pub(crate) fn deregister(&self, id: u64) {
        lock(&self.statements).remove(&id);
    }

    fn live_statements(&self) -> usize {
        lock(&self.statements).len()
    }

    fn is_closed(&self) -> bool {
        lock(&self.db).is_none()
    }

    /// Finalizes every registered statement, then releases the handle.
    ///
    /// Finalize statuses are ignored: a failing statement repeats its last
    /// execution error there, and every statement must still be released.
    fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }

        let slots: Vec<Arc<StatementSlot>> = lock(&self.statements)
            .drain()
            .filter_map(|(_, slot)| slot.upgrade())
            .collect();

        if !slots.is_empty() {
            debug!(
                "Connection disposing of {} remaining statements",
                slots.len()
            );
        }

        for slot in slots {
            if let Some(code) = slot.finalize() {
                if !native::is_success(code) {
                    trace!(code, "Ignoring finalize status during close");
                }
            }
        }

        let mut guard = lock(&self.db);
        let Some(db) = guard.take() else {
            return Ok(());
        };

        match db.close() {
            Ok(()) => {
                debug!("Closed database at {}", self.path);
                Ok(())
            }
            Err((code, db)) => {
                let message = db.errmsg();
                *guard = Some(db);
                Err(SqlstepError::Status { code, message })
            }
        }
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        // Reached only when a close failed and nothing retried it.
        let db = self
            .db
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(db) = db {
            let code = db.close_deferred();
            if native::is_success(code) {
                debug!("Deferred close of database at {}", self.path);
            } else {
                warn!("Leaking database handle for {}: close returned {}", self.path, code);
            }
        }
    }
}

fn status_error(code: i32, message: String, sql: Option<&str>) -> SqlstepError {
    let message = match sql {
        Some(sql) => format!("{} (SQL: {})", message, sql),
        None => message,
    };
    SqlstepError::Status { code, message }
}

/// An open database.
///
/// Dropping a `Connection` closes it. Statements prepared from it may
/// outlive it; they report `Disposed` once the connection is closed.
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Opens or creates the database at `path` with default settings.
    ///
    /// # Errors
    ///
    /// Returns `SqlstepError::Open` if the engine reports a failure or no
    /// handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use sqlstep::Connection;
    ///
    /// let conn = Connection::open(":memory:")?;
    /// assert_eq!(conn.query_scalar("SELECT 7")?, sqlstep::Value::Integer(7));
    /// # Ok::<(), sqlstep::SqlstepError>(())
    /// ```
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_config(path, &ConnectionConfig::default())
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(MEMORY_PATH)
    }

    /// Opens `path` and applies `config` (result-code mode, busy timeout,
    /// pragmas).
    pub fn open_with_config(path: &str, config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;

        let db = RawDb::open(path).map_err(|(code, message)| SqlstepError::Open {
            target: path.to_string(),
            message: format!("{} (code {})", message, code),
        })?;

        let conn = Connection {
            inner: Arc::new(ConnectionInner {
                path: path.to_string(),
                db: Mutex::new(Some(db)),
                statements: Mutex::new(HashMap::new()),
                next_statement_id: AtomicU64::new(1),
            }),
        };

        let code = conn
            .inner
            .with_db(|db| db.set_extended_result_codes(config.extended_result_codes))?;
        conn.check_status(code, None)?;

        if let Some(timeout) = config.busy_timeout() {
            conn.set_busy_timeout(timeout)?;
        }
        if let Some(enabled) = config.foreign_keys {
            let flag = if enabled { "ON" } else { "OFF" };
            conn.execute(&format!("PRAGMA foreign_keys = {}", flag))?;
        }
        if let Some(mode) = &config.journal_mode {
            conn.execute(&format!("PRAGMA journal_mode = {}", mode))?;
        }

        debug!("Opened database at {}", path);
        Ok(conn)
    }

    /// Path the connection was opened with.
    pub fn path(&self) -> &str {
        self.inner.path()
    }

    /// True once `close` has completed.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of statements prepared from this connection and not yet
    /// disposed.
    pub fn live_statements(&self) -> usize {
        self.inner.live_statements()
    }

    /// Rowid of the most recent successful insert on this connection.
    pub fn last_insert_rowid(&self) -> Result<i64> {
        self.inner.with_db(|db| db.last_insert_rowid())
    }

    /// Makes the engine wait up to `timeout` on a locked database before
    /// reporting busy. Busy statuses are still surfaced as errors.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        let code = self.inner.with_db(|db| db.busy_timeout(timeout))?;
        self.check_status(code, None)
    }

    /// Prepares `sql` as a single-command statement.
    ///
    /// # Errors
    ///
    /// - `SqlstepError::Status` if the engine rejects the SQL
    /// - `SqlstepError::MultiStatement` if `sql` holds more than one command
    /// - `SqlstepError::Disposed` if the connection is closed
    pub fn prepare(&self, sql: &str) -> Result<Statement> {
        Statement::prepare(Arc::clone(&self.inner), sql)
    }

    /// Prepares `sql` and returns a cursor that owns the statement. The
    /// statement is not stepped until the first `read`.
    pub fn query(&self, sql: &str) -> Result<ResultCursor<'static>> {
        Ok(self.prepare(sql)?.into_cursor())
    }

    /// First column of the first row, or `Value::Null` if there are no rows.
    pub fn query_scalar(&self, sql: &str) -> Result<Value> {
        let mut stmt = self.prepare(sql)?;
        let result = stmt.query_scalar();
        stmt.dispose();
        result
    }

    /// Runs `sql` for its side effects.
    pub fn execute(&self, sql: &str) -> Result<()> {
        let mut stmt = self.prepare(sql)?;
        let result = stmt.execute().map(|_| ());
        stmt.dispose();
        result
    }

    /// Translates a native status code. ok (0), row (100) and done (101)
    /// pass; every other code is a `Status` error.
    pub fn check_status(&self, code: i32, sql: Option<&str>) -> Result<()> {
        self.inner.check_status(code, sql)
    }

    /// Finalizes every outstanding statement and releases the handle.
    /// Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }

    pub(crate) fn inner(&self) -> &ConnectionInner {
        &self.inner
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.inner.path)
            .field("closed", &self.is_closed())
            .field("live_statements", &self.live_statements())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!("Failed to close database at {}: {}", self.inner.path, e);
        }
    }
}
