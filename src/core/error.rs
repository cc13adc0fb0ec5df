/// sqlstep Error Module
///
/// This module defines the error taxonomy for statement lifecycle, binding
/// and result decoding. Every misuse (unbound read, wrong arity, use after
/// dispose) surfaces synchronously as one of these variants.
use crate::core::db::native;
use thiserror::Error;

/// Comprehensive error type for sqlstep.
///
/// The first group mirrors the engine-facing failure classes:
/// - opening a database or preparing a statement that yields no handle
/// - any native status outside {ok, row, done}
/// - multi-command SQL text
/// - binding and reading contract violations
///
/// The second group covers local concerns (typed reads, configuration, I/O).
#[derive(Error, Debug)]
pub enum SqlstepError {
    /// The backing store could not be opened, or prepare produced no handle
    #[error("Unable to open {target}: {message}")]
    Open { target: String, message: String },

    /// A native status code other than ok/row/done
    #[error("SQLite error {code}: {message}")]
    Status { code: i32, message: String },

    /// More than one command in a single statement's text
    #[error("multiple commands in one statement are not supported: {sql}")]
    MultiStatement { sql: String },

    /// Value count does not match the statement's parameter count
    #[error("statement has {expected} parameters, {supplied} supplied")]
    BindArity { expected: usize, supplied: usize },

    /// Read attempted on a parameterized statement that was never bound
    #[error("statement not bound")]
    NotBound,

    /// Column access without a current row
    #[error("statement is not readable: no current row")]
    NoRow,

    /// Column lookup by a name the result shape does not contain
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Column ordinal past the end of the result shape
    #[error("column {ordinal} out of range (field count {count})")]
    ColumnOutOfRange { ordinal: usize, count: usize },

    /// Engine reported a storage class outside the known set
    #[error("column {ordinal} is of unknown type {type_tag}")]
    Decode { ordinal: usize, type_tag: i32 },

    /// Use of a statement or connection after it has been disposed
    #[error("{0} is disposed")]
    Disposed(&'static str),

    /// A decoded value could not be converted to the requested Rust type
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Failure raised from inside a registered SQL function
    #[error("Function error: {0}")]
    Function(String),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SqlstepError {
    /// Native status code carried by a `Status` error.
    pub fn code(&self) -> Option<i32> {
        match self {
            SqlstepError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True when the engine reported a contended resource.
    ///
    /// Extended codes (e.g. `SQLITE_BUSY_SNAPSHOT`) share the primary code in
    /// their low byte.
    pub fn is_busy(&self) -> bool {
        self.code().map_or(false, native::is_busy)
    }
}

/// Type alias for Result to use SqlstepError as the error type.
pub type Result<T> = std::result::Result<T, SqlstepError>;
