/// Result Cursor Module
///
/// A forward-only, single-pass view over the rows of one statement. Each
/// statement has exactly one cursor state; a `ResultCursor` either borrows
/// the statement or owns it (the cursor returned by `Connection::query`),
/// in which case dropping the cursor disposes the statement.

use super::statement::Statement;
use super::value::{FromValue, Value};
use crate::core::Result;

/// How a cursor holds its statement.
#[derive(Debug)]
pub enum StatementRef<'s> {
    Borrowed(&'s mut Statement),
    /// The cursor disposes the statement when it is dropped
    Owned(Statement),
}

/// Column addressing: by ordinal or by result-column name.
pub trait ColumnIndex {
    fn ordinal(&self, statement: &Statement) -> Result<usize>;
}

impl ColumnIndex for usize {
    fn ordinal(&self, _statement: &Statement) -> Result<usize> {
        Ok(*self)
    }
}

impl ColumnIndex for &str {
    fn ordinal(&self, statement: &Statement) -> Result<usize> {
        statement.column_ordinal(self)
    }
}

/// Forward-only reader over a statement's rows.
///
/// Column reads are valid only while the last `read` returned `true`.
///
/// ```
/// use sqlstep::Connection;
///
/// let conn = Connection::open_in_memory()?;
/// let mut cursor = conn.query("SELECT 7 AS answer")?;
/// while cursor.read()? {
///     assert_eq!(cursor.get::<i64, _>("answer")?, 7);
/// }
/// # Ok::<(), sqlstep::SqlstepError>(())
/// ```
#[derive(Debug)]
pub struct ResultCursor<'s> {
    statement: StatementRef<'s>,
}

impl<'s> ResultCursor<'s> {
    pub(crate) fn borrowed(statement: &'s mut Statement) -> Self {
        ResultCursor {
            statement: StatementRef::Borrowed(statement),
        }
    }

    pub(crate) fn owned(statement: Statement) -> ResultCursor<'static> {
        ResultCursor {
            statement: StatementRef::Owned(statement),
        }
    }

    /// True when dropping this cursor disposes its statement.
    pub fn owns_statement(&self) -> bool {
        matches!(self.statement, StatementRef::Owned(_))
    }

    pub fn statement(&self) -> &Statement {
        match &self.statement {
            StatementRef::Borrowed(s) => s,
            StatementRef::Owned(s) => s,
        }
    }

    fn statement_mut(&mut self) -> &mut Statement {
        match &mut self.statement {
            StatementRef::Borrowed(s) => s,
            StatementRef::Owned(s) => s,
        }
    }

    /// Advances to the next row.
    ///
    /// # Errors
    ///
    /// - `SqlstepError::NotBound` for a parameterized statement never bound
    /// - `SqlstepError::Status` if the engine reports an error while stepping
    /// - `SqlstepError::Disposed` after the statement was disposed
    pub fn read(&mut self) -> Result<bool> {
        self.statement_mut().step()
    }

    /// Number of columns in the result shape.
    pub fn field_count(&self) -> Result<usize> {
        self.statement().field_count()
    }

    /// Result-column names in ordinal order.
    pub fn column_names(&self) -> Result<Vec<String>> {
        self.statement().column_names()
    }

    /// Value of a column in the current row.
    pub fn value<I: ColumnIndex>(&self, index: I) -> Result<Value> {
        let statement = self.statement();
        statement.check_reading()?;
        let ordinal = index.ordinal(statement)?;
        statement.column_value(ordinal)
    }

    /// Value of a column in the current row, converted to `T`.
    pub fn get<T: FromValue, I: ColumnIndex>(&self, index: I) -> Result<T> {
        T::from_value(self.value(index)?)
    }

    /// Copies every column of the current row.
    pub fn values(&self) -> Result<Vec<Value>> {
        let count = self.field_count()?;
        (0..count).map(|ordinal| self.value(ordinal)).collect()
    }

    /// Drops the cursor, disposing the statement if the cursor owns it.
    pub fn close(self) {
        if let StatementRef::Owned(mut statement) = self.statement {
            statement.dispose();
        }
    }
}
