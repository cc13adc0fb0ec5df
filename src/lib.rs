// Core infrastructure modules
pub mod core;

pub mod config;
pub mod logging;

#[cfg(test)]
mod test_utils;


// Re-export the public surface at the crate root
pub use crate::config::{Config, ConnectionConfig, LoggingConfig};
pub use crate::core::db::{
    AggregateState, ColumnIndex, Connection, FromValue, FunctionCallback, FunctionDescriptor,
    FunctionKind, ResultCursor, Rows, Statement, StatementRef, Value, WireKind, MEMORY_PATH,
};
pub use crate::core::{Result, SqlstepError};
