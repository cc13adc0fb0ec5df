/// Statement Module
///
/// A `Statement` is one prepared, single-command SQL text bound to the
/// connection it was prepared from. It owns the native statement handle,
/// enforces the bind-before-read contract and carries the state of its one
/// result cursor.

use super::connection::ConnectionInner;
use super::cursor::ResultCursor;
use super::lock;
use super::native::{self, Outcome, RawStmt, StorageClass};
use super::value::{Value, WireKind};
use crate::core::{Result, SqlstepError};
use once_cell::unsync::OnceCell;
use std::collections::HashMap;
use std::ffi::c_int;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Longest SQL excerpt quoted in a `MultiStatement` error.
const SQL_PREVIEW_CHARS: usize = 80;

fn sql_preview(sql: &str) -> String {
    let sql = sql.trim();
    match sql.char_indices().nth(SQL_PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &sql[..end]),
        None => sql.to_string(),
    }
}

/// Holder of a native statement handle, shared with the owning connection
/// so that closing the connection can finalize it.
#[derive(Debug)]
pub(crate) struct StatementSlot {
    raw: Mutex<Option<RawStmt>>,
}

impl StatementSlot {
    fn new(raw: RawStmt) -> Self {
        StatementSlot {
            raw: Mutex::new(Some(raw)),
        }
    }

    /// Finalizes the handle if still present and returns the engine status.
    pub(crate) fn finalize(&self) -> Option<i32> {
        lock(&self.raw).take().map(RawStmt::finalize)
    }

    fn is_finalized(&self) -> bool {
        lock(&self.raw).is_none()
    }
}

/// Per-statement cursor state. Column shape is fixed by the prepared form,
/// so the count and name index are computed at most once.
#[derive(Debug, Default)]
struct CursorState {
    /// The last step produced a row
    reading: bool,
    /// The last step finished the result set; cleared by reset
    exhausted: bool,
    /// Code and message of a failed step, reported again by every read
    /// until reset
    failure: Option<(i32, String)>,
    field_count: OnceCell<usize>,
    columns: OnceCell<HashMap<String, usize>>,
}

/// A prepared statement.
///
/// Dropping a `Statement` disposes it. All driving operations take
/// `&mut self`: a statement has a single execution cursor and must not be
/// stepped from two places at once.
///
/// # Examples
///
/// ```
/// use sqlstep::{params, Connection, Value};
///
/// let conn = Connection::open_in_memory()?;
/// let mut stmt = conn.prepare("SELECT ? + 1")?;
/// assert_eq!(stmt.bind(&params![41])?.query_scalar()?, Value::Integer(42));
/// # Ok::<(), sqlstep::SqlstepError>(())
/// ```
pub struct Statement {
    connection: Arc<ConnectionInner>,
    slot: Arc<StatementSlot>,
    id: u64,
    command_text: String,
    parameter_count: usize,
    bound: bool,
    state: CursorState,
}

impl Statement {
    /// Prepares `sql` against `connection` and registers the result.
    pub(crate) fn prepare(connection: Arc<ConnectionInner>, sql: &str) -> Result<Statement> {
        let prepared = connection.with_db(|db| db.prepare(sql))?;

        if let Err(e) = connection.check_outcome(prepared.outcome, Some(sql)) {
            if let Some(raw) = prepared.stmt {
                raw.finalize();
            }
            return Err(e);
        }

        let Some(raw) = prepared.stmt else {
            return Err(SqlstepError::Open {
                target: connection.path().to_string(),
                message: format!("no statement to prepare: {}", sql_preview(sql)),
            });
        };

        // Registered before validation so a failure below is released
        // through the ordinary dispose path.
        let slot = Arc::new(StatementSlot::new(raw));
        let id = connection.register(&slot);
        trace!(id, sql, "Prepared statement");

        let mut statement = Statement {
            connection,
            slot,
            id,
            command_text: sql.to_string(),
            parameter_count: 0,
            bound: false,
            state: CursorState::default(),
        };

        // Anything after the first command, even whitespace, is rejected.
        if !prepared.tail.is_empty() {
            statement.dispose();
            return Err(SqlstepError::MultiStatement {
                sql: sql_preview(sql),
            });
        }

        statement.parameter_count = statement.with_raw(RawStmt::parameter_count)?;
        Ok(statement)
    }

    /// The SQL text this statement was prepared from.
    pub fn command_text(&self) -> &str {
        &self.command_text
    }

    /// Number of `?`-style parameters in the prepared form.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// True once values have been bound.
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// True after `dispose`, or after the owning connection was closed.
    pub fn is_disposed(&self) -> bool {
        self.slot.is_finalized()
    }

    fn with_raw<T>(&self, f: impl FnOnce(&RawStmt) -> T) -> Result<T> {
        let guard = lock(&self.slot.raw);
        match guard.as_ref() {
            Some(raw) => Ok(f(raw)),
            None => Err(SqlstepError::Disposed("statement")),
        }
    }

    fn check(&self, outcome: Outcome) -> Result<()> {
        self.connection
            .check_outcome(outcome, Some(&self.command_text))
    }

    pub(crate) fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(SqlstepError::Disposed("statement"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_reading(&self) -> Result<()> {
        self.check_disposed()?;
        if self.state.reading {
            Ok(())
        } else {
            Err(SqlstepError::NoRow)
        }
    }

    /// Binds `values` to parameters 1..=n, restarting the statement first.
    ///
    /// Returns `self` so binding composes with `execute` or `query_scalar`.
    ///
    /// # Errors
    ///
    /// - `SqlstepError::BindArity` if the statement has no parameters or
    ///   `values.len()` differs from `parameter_count()`
    /// - `SqlstepError::Status` if the engine rejects a value; the remaining
    ///   values are not bound and the statement counts as unbound
    pub fn bind(&mut self, values: &[Value]) -> Result<&mut Self> {
        self.check_disposed()?;
        if self.parameter_count == 0 || values.len() != self.parameter_count {
            return Err(SqlstepError::BindArity {
                expected: self.parameter_count,
                supplied: values.len(),
            });
        }

        self.reset()?;
        self.bound = false;

        for (i, value) in values.iter().enumerate() {
            let index = (i + 1) as c_int;
            let outcome = self.with_raw(|raw| raw.guarded(|raw| bind_value(raw, index, value)))?;
            self.check(outcome)?;
        }

        self.bound = true;
        Ok(self)
    }

    /// Rewinds to before the first row. Bound values are kept.
    ///
    /// The engine's reset status only repeats the error of the previous
    /// step, which was already reported, so it is not re-raised here.
    pub fn reset(&mut self) -> Result<()> {
        self.with_raw(RawStmt::reset)?;
        self.state.reading = false;
        self.state.exhausted = false;
        self.state.failure = None;
        Ok(())
    }

    /// Restarts the statement and steps it once, discarding any row.
    pub fn execute(&mut self) -> Result<&mut Self> {
        self.reset()?;
        self.step()?;
        Ok(self)
    }

    /// Restarts the statement and returns column 0 of its first row, or
    /// `Value::Null` when there is no row.
    pub fn query_scalar(&mut self) -> Result<Value> {
        self.reset()?;
        if self.step()? {
            self.column_value(0)
        } else {
            Ok(Value::Null)
        }
    }

    /// Restarts the statement and returns a cursor borrowing it.
    pub fn query(&mut self) -> Result<ResultCursor<'_>> {
        self.reset()?;
        Ok(ResultCursor::borrowed(self))
    }

    /// Turns the statement into a cursor that disposes it when dropped.
    pub fn into_cursor(self) -> ResultCursor<'static> {
        ResultCursor::owned(self)
    }

    /// Restarts the statement and iterates its rows.
    ///
    /// Every item is the same cursor positioned on the next row, not a
    /// snapshot: values read from one row must be copied out (for example
    /// with [`ResultCursor::values`]) before advancing.
    ///
    /// ```
    /// use sqlstep::Connection;
    ///
    /// let conn = Connection::open_in_memory()?;
    /// let mut stmt = conn.prepare("SELECT 1 UNION ALL SELECT 2")?;
    /// let mut rows = stmt.rows()?;
    /// let mut total = 0;
    /// while let Some(row) = rows.next()? {
    ///     total += row.get::<i64, _>(0)?;
    /// }
    /// assert_eq!(total, 3);
    /// # Ok::<(), sqlstep::SqlstepError>(())
    /// ```
    pub fn rows(&mut self) -> Result<Rows<'_>> {
        self.reset()?;
        Ok(Rows {
            cursor: ResultCursor::borrowed(self),
        })
    }

    /// Applies `f` to the first row, if any.
    pub fn query_row<T, F>(&mut self, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&ResultCursor<'_>) -> Result<T>,
    {
        let mut rows = self.rows()?;
        match rows.next()? {
            Some(row) => f(row).map(Some),
            None => Ok(None),
        }
    }

    /// Applies `f` to every row and collects the results.
    pub fn query_map<T, F>(&mut self, mut f: F) -> Result<Vec<T>>
    where
        F: FnMut(&ResultCursor<'_>) -> Result<T>,
    {
        let mut rows = self.rows()?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(f(row)?);
        }
        Ok(out)
    }

    /// Finalizes the native handle and deregisters from the connection.
    /// Safe to call more than once.
    ///
    /// The finalize status is discarded: it repeats the most recent
    /// execution error, if any, and must not prevent teardown.
    pub fn dispose(&mut self) {
        if let Some(code) = self.slot.finalize() {
            trace!(id = self.id, code, "Finalized statement");
        }
        self.connection.deregister(self.id);
        self.state.reading = false;
    }

    /// Advances the execution cursor by one row.
    ///
    /// A busy status leaves the statement where it was, so the caller may
    /// step again. Any other error is sticky: it is returned by every step
    /// until the statement is reset.
    pub(crate) fn step(&mut self) -> Result<bool> {
        self.check_disposed()?;
        if self.parameter_count > 0 && !self.bound {
            return Err(SqlstepError::NotBound);
        }
        if let Some((code, message)) = &self.state.failure {
            return Err(SqlstepError::Status {
                code: *code,
                message: message.clone(),
            });
        }
        if self.state.exhausted {
            self.state.reading = false;
            return Ok(false);
        }

        let outcome = self.with_raw(RawStmt::step)?;
        self.state.reading = outcome.code == native::ROW;
        match outcome.code {
            native::ROW => Ok(true),
            native::DONE => {
                self.state.exhausted = true;
                Ok(false)
            }
            code => {
                let err = match self.check(outcome) {
                    Err(err) => err,
                    Ok(()) => return Ok(false),
                };
                if !native::is_busy(code) {
                    if let SqlstepError::Status { code, message } = &err {
                        self.state.failure = Some((*code, message.clone()));
                    }
                }
                Err(err)
            }
        }
    }

    /// Number of result columns, queried once.
    pub(crate) fn field_count(&self) -> Result<usize> {
        self.state
            .field_count
            .get_or_try_init(|| self.with_raw(RawStmt::column_count))
            .copied()
    }

    pub(crate) fn column_names(&self) -> Result<Vec<String>> {
        let count = self.field_count()?;
        self.with_raw(|raw| (0..count).map(|i| raw.column_name(i as c_int)).collect())
    }

    /// Resolves a column name; the first column wins on duplicates.
    pub(crate) fn column_ordinal(&self, name: &str) -> Result<usize> {
        let columns = self.state.columns.get_or_try_init(|| {
            let names = self.column_names()?;
            let mut index = HashMap::with_capacity(names.len());
            for (ordinal, name) in names.into_iter().enumerate() {
                index.entry(name).or_insert(ordinal);
            }
            Ok::<_, SqlstepError>(index)
        })?;

        columns
            .get(name)
            .copied()
            .ok_or_else(|| SqlstepError::UnknownColumn(name.to_string()))
    }

    /// Decodes column `ordinal` of the current row by its storage class.
    pub(crate) fn column_value(&self, ordinal: usize) -> Result<Value> {
        self.check_reading()?;
        let count = self.field_count()?;
        if ordinal >= count {
            return Err(SqlstepError::ColumnOutOfRange { ordinal, count });
        }

        let index = ordinal as c_int;
        self.with_raw(|raw| {
            let type_tag = raw.column_type(index);
            match StorageClass::from_tag(type_tag) {
                Some(StorageClass::Integer) => Ok(Value::Integer(raw.column_int64(index))),
                Some(StorageClass::Float) => Ok(Value::Real(raw.column_double(index))),
                Some(StorageClass::Text) => Ok(Value::Text(raw.column_text(index))),
                Some(StorageClass::Blob) => Ok(Value::Blob(raw.column_blob(index))),
                Some(StorageClass::Null) => Ok(Value::Null),
                None => Err(SqlstepError::Decode { ordinal, type_tag }),
            }
        })?
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("id", &self.id)
            .field("command_text", &self.command_text)
            .field("parameter_count", &self.parameter_count)
            .field("bound", &self.bound)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn bind_value(raw: &RawStmt, index: c_int, value: &Value) -> i32 {
    match (value.wire_kind(), value) {
        (WireKind::Int32, Value::Integer(i)) => raw.bind_int(index, *i as i32),
        (WireKind::Int64, Value::Integer(i)) => raw.bind_int64(index, *i),
        (WireKind::Double, Value::Real(f)) => raw.bind_double(index, *f),
        (WireKind::Text, Value::Text(s)) => raw.bind_text(index, s),
        (WireKind::Blob, Value::Blob(b)) => raw.bind_blob(index, b),
        _ => raw.bind_null(index),
    }
}

/// Lending iterator over a statement's rows.
///
/// `next` hands out the statement's single cursor each time, so a row
/// reference cannot be held across calls.
pub struct Rows<'s> {
    cursor: ResultCursor<'s>,
}

impl<'s> Rows<'s> {
    /// Steps to the next row; `None` once the result set is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<&ResultCursor<'s>>> {
        if self.cursor.read()? {
            Ok(Some(&self.cursor))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Connection;
    use crate::params;

    #[test]
    fn test_sql_preview_truncates() {
        assert_eq!(sql_preview("  SELECT 1  "), "SELECT 1");
        let long = "x".repeat(200);
        let preview = sql_preview(&long);
        assert_eq!(preview.len(), SQL_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_prepare_registers_and_dispose_deregisters() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT 1").unwrap();
        assert_eq!(conn.live_statements(), 1);
        assert_eq!(stmt.command_text(), "SELECT 1");
        assert_eq!(stmt.parameter_count(), 0);

        stmt.dispose();
        assert!(stmt.is_disposed());
        assert_eq!(conn.live_statements(), 0);

        // second dispose is a no-op
        stmt.dispose();
        assert!(matches!(
            stmt.execute().map(|_| ()),
            Err(SqlstepError::Disposed("statement"))
        ));
    }

    #[test]
    fn test_multiple_commands_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn
            .prepare("CREATE TABLE l (id INTEGER PRIMARY KEY, name TEXT); INSERT INTO l (name) VALUES ('Foo')")
            .unwrap_err();
        match err {
            SqlstepError::MultiStatement { sql } => assert!(sql.starts_with("CREATE TABLE l")),
            other => panic!("Expected MultiStatement error, got {:?}", other),
        }
        assert_eq!(conn.live_statements(), 0);
        // the first command must not have run
        assert!(conn.query_scalar("SELECT COUNT(*) FROM l").is_err());
    }

    #[test]
    fn test_trailing_semicolon_accepted() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(conn.query_scalar("SELECT 7;").unwrap(), Value::Integer(7));
        assert_eq!(conn.query_scalar("  SELECT 7").unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_any_text_after_terminator_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        for sql in ["SELECT 7;  \n\t", "SELECT 7; -- trailing", "SELECT 7;;"] {
            assert!(
                matches!(
                    conn.prepare(sql).unwrap_err(),
                    SqlstepError::MultiStatement { .. }
                ),
                "{:?} should be rejected",
                sql
            );
        }
        assert_eq!(conn.live_statements(), 0);
    }

    #[test]
    fn test_empty_sql_is_open_error() {
        let conn = Connection::open_in_memory().unwrap();
        match conn.prepare("  -- just a comment").unwrap_err() {
            SqlstepError::Open { message, .. } => {
                assert!(message.contains("no statement to prepare"))
            }
            other => panic!("Expected Open error, got {:?}", other),
        }
        assert_eq!(conn.live_statements(), 0);
    }

    #[test]
    fn test_syntax_error_is_status_error() {
        let conn = Connection::open_in_memory().unwrap();
        match conn.prepare("SELEKT 1").unwrap_err() {
            SqlstepError::Status { code, message } => {
                assert_eq!(code, 1);
                assert!(message.contains("(SQL: SELEKT 1)"));
            }
            other => panic!("Expected Status error, got {:?}", other),
        }
        assert_eq!(conn.live_statements(), 0);
    }

    #[test]
    fn test_bind_arity() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT ? AS version").unwrap();
        assert_eq!(stmt.parameter_count(), 1);

        assert!(matches!(
            stmt.bind(&params![1, 2]).map(|_| ()),
            Err(SqlstepError::BindArity {
                expected: 1,
                supplied: 2
            })
        ));
        assert!(matches!(
            stmt.bind(&params![]).map(|_| ()),
            Err(SqlstepError::BindArity {
                expected: 1,
                supplied: 0
            })
        ));

        let mut plain = conn.prepare("SELECT 2 + 5 AS res").unwrap();
        assert!(matches!(
            plain.bind(&params![]).map(|_| ()),
            Err(SqlstepError::BindArity {
                expected: 0,
                supplied: 0
            })
        ));
    }

    #[test]
    fn test_unbound_read_fails() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT ? AS version").unwrap();
        assert!(matches!(stmt.query_scalar(), Err(SqlstepError::NotBound)));
        assert!(matches!(
            stmt.execute().map(|_| ()),
            Err(SqlstepError::NotBound)
        ));

        stmt.bind(&params![21]).unwrap();
        assert!(stmt.is_bound());
        assert_eq!(stmt.query_scalar().unwrap(), Value::Integer(21));
    }

    #[test]
    fn test_rebind_restarts() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT ? AS version").unwrap();

        stmt.bind(&params![21]).unwrap();
        let first = stmt
            .query_row(|row| row.value("version"))
            .unwrap()
            .unwrap();
        assert_eq!(first, Value::Integer(21));

        stmt.bind(&params!["ffoooo"]).unwrap();
        let second = stmt.query_row(|row| row.value(0)).unwrap().unwrap();
        assert_eq!(second, Value::Text("ffoooo".to_string()));
    }

    #[test]
    fn test_bound_values_survive_reset() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT ? AS a, ? AS b, ?").unwrap();
        stmt.bind(&params![1, "two", 3.3]).unwrap();

        assert_eq!(stmt.query_scalar().unwrap(), Value::Integer(1));
        assert_eq!(
            stmt.query_row(|row| row.value("b")).unwrap().unwrap(),
            Value::Text("two".to_string())
        );
        assert_eq!(
            stmt.query_row(|row| row.value(2)).unwrap().unwrap(),
            Value::Real(3.3)
        );
    }

    #[test]
    fn test_failed_step_does_not_poison_rebind() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE u (name TEXT UNIQUE)").unwrap();
        let mut insert = conn.prepare("INSERT INTO u (name) VALUES (?)").unwrap();

        insert.bind(&params!["a"]).unwrap().execute().unwrap();
        let err = insert.bind(&params!["a"]).unwrap().execute().unwrap_err();
        assert!(matches!(err, SqlstepError::Status { .. }));

        insert.bind(&params!["b"]).unwrap().execute().unwrap();
        assert_eq!(
            conn.query_scalar("SELECT COUNT(*) FROM u").unwrap(),
            Value::Integer(2)
        );
    }

    #[test]
    fn test_read_past_end_stays_exhausted() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT 1").unwrap();
        assert!(stmt.step().unwrap());
        assert!(!stmt.step().unwrap());
        assert!(!stmt.step().unwrap());
        assert!(matches!(stmt.column_value(0), Err(SqlstepError::NoRow)));

        stmt.reset().unwrap();
        assert!(stmt.step().unwrap());
    }

    #[test]
    fn test_failed_step_is_reported_until_reset() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (x INTEGER PRIMARY KEY)").unwrap();
        conn.execute("INSERT INTO t VALUES (1), (2), (3)").unwrap();
        conn.add_function(crate::core::db::FunctionDescriptor::scalar("chk", 1, |args| {
            match args[0].as_i64() {
                Some(2) => Err(SqlstepError::Function("bad row".to_string())),
                _ => Ok(args[0].clone()),
            }
        }))
        .unwrap();

        let mut stmt = conn.prepare("SELECT chk(x) FROM t ORDER BY x").unwrap();
        assert!(stmt.step().unwrap());
        for _ in 0..3 {
            match stmt.step().unwrap_err() {
                SqlstepError::Status { code, message } => {
                    assert_eq!(code, 1);
                    assert!(message.contains("bad row"));
                }
                other => panic!("Expected Status error, got {:?}", other),
            }
        }
        assert!(matches!(stmt.column_value(0), Err(SqlstepError::NoRow)));

        stmt.reset().unwrap();
        assert!(stmt.step().unwrap());
        assert_eq!(stmt.column_value(0).unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_query_map_collects_rows() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn
            .prepare("SELECT 1 UNION ALL SELECT 2 UNION ALL SELECT 3")
            .unwrap();
        let values: Vec<i64> = stmt.query_map(|row| row.get(0)).unwrap();
        assert_eq!(values, vec![1, 2, 3]);

        // restartable
        let again: Vec<i64> = stmt.query_map(|row| row.get(0)).unwrap();
        assert_eq!(again, values);
    }

    #[test]
    fn test_column_out_of_range() {
        let conn = Connection::open_in_memory().unwrap();
        let mut stmt = conn.prepare("SELECT 1, 2").unwrap();
        let err = stmt.query_row(|row| row.value(2)).unwrap_err();
        assert!(matches!(
            err,
            SqlstepError::ColumnOutOfRange {
                ordinal: 2,
                count: 2
            }
        ));
    }
}
