/// Core Module for sqlstep
///
/// This module contains the statement lifecycle engine and the error type
/// shared by every layer of the crate.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, SqlstepError};
