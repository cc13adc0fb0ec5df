/// Database Module
///
/// This module provides the statement lifecycle over an embedded SQLite
/// engine, organized into focused submodules.
///
/// ## Architecture
///
/// - **Native protocol** (`native.rs`): the narrow C API surface, no error translation
/// - **Connection** (`connection.rs`): owns the database handle, tracks live statements, translates status codes
/// - **Statement** (`statement.rs`): prepare, bind, execute, dispose
/// - **Result cursor** (`cursor.rs`): forward-only row access and typed column decoding
/// - **Values** (`value.rs`): the coercion table between Rust types and engine storage classes
/// - **Functions** (`function.rs`): explicit registration of scalar, aggregate and collation callbacks
///
/// ## Error Handling
///
/// All operations use the standardized `SqlstepError` type.
pub mod connection;
pub mod cursor;
pub mod function;
pub(crate) mod native;
pub mod statement;
pub mod value;

pub use connection::*;
pub use cursor::*;
pub use function::*;
pub use statement::*;
pub use value::*;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a previous holder panicked.
///
/// The guarded state (a handle slot or the live-statement map) is never left
/// half-updated, so the poison flag carries no information here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
