/// # Test Utilities Module
///
/// Shared fixtures and assertion helpers for the crate's unit and
/// integration tests.
///
/// This module provides:
/// - Database fixtures (in-memory or on-disk) with a small Users schema
/// - SqlstepError-specific testing helpers
/// - Timing helpers

use crate::core::db::Connection;
use crate::core::Result;
use crate::params;
use tempfile::TempDir;

/// Isolated database test fixture
pub struct DatabaseFixture {
    pub name: String,
    pub connection: Connection,
    /// Keeps the directory of an on-disk database alive
    _dir: Option<TempDir>,
}

impl DatabaseFixture {
    /// Create a new in-memory test database
    pub fn new(name: &str) -> Result<Self> {
        Ok(DatabaseFixture {
            name: name.to_string(),
            connection: Connection::open_in_memory()?,
            _dir: None,
        })
    }

    /// Create a new test database backed by a file in a temporary directory
    pub fn on_disk(name: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(format!("{}.db", name));
        let connection = Connection::open(&path.to_string_lossy())?;

        Ok(DatabaseFixture {
            name: name.to_string(),
            connection,
            _dir: Some(dir),
        })
    }

    /// Create fixture with the Users table populated
    pub fn with_users(name: &str) -> Result<Self> {
        let fixture = Self::new(name)?;
        fixture.create_users()?;
        Ok(fixture)
    }

    /// (Re)creates `Users (ID INTEGER PRIMARY KEY, Name TEXT)` holding
    /// Gabriel (ID 1) and Aaron (ID 2).
    pub fn create_users(&self) -> Result<()> {
        self.connection.execute("DROP TABLE IF EXISTS Users")?;
        self.connection
            .execute("CREATE TABLE Users (ID INTEGER PRIMARY KEY, Name TEXT)")?;

        let mut insert = self
            .connection
            .prepare("INSERT INTO Users (Name) VALUES (?)")?;
        insert.bind(&params!["Gabriel"])?.execute()?;
        insert.bind(&params!["Aaron"])?.execute()?;
        Ok(())
    }
}

/// Error testing utilities specific to SqlstepError patterns
pub mod error_testing {
    use crate::core::SqlstepError;

    /// Test that a result carries a `Status` error with the given primary code
    pub fn assert_status_code<T: std::fmt::Debug>(
        result: &std::result::Result<T, SqlstepError>,
        expected_code: i32,
        context: &str,
    ) {
        match result {
            Err(SqlstepError::Status { code, .. }) => assert_eq!(
                code & 0xff,
                expected_code,
                "Unexpected status code in {}",
                context
            ),
            other => panic!("Expected Status error in {} but got {:?}", context, other),
        }
    }

    /// Test that the error message mentions a fragment
    pub fn assert_error_mentions<T, E>(
        result: &std::result::Result<T, E>,
        expected_message_fragment: &str,
        context: &str,
    ) where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => panic!("Expected error but got Ok in {}", context),
            Err(e) => {
                let error_str = e.to_string();
                assert!(
                    error_str
                        .to_lowercase()
                        .contains(&expected_message_fragment.to_lowercase()),
                    "Expected '{}' in error message '{}' context: {}",
                    expected_message_fragment,
                    error_str,
                    context
                );
            }
        }
    }
}

/// Performance testing utilities
pub mod performance {
    use std::time::{Duration, Instant};

    /// Measure execution time of a function
    pub fn measure_execution<F, R>(f: F) -> (R, Duration)
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        (result, start.elapsed())
    }
}

/// Helper macro for matching an error variant
#[macro_export]
macro_rules! assert_sqlstep_error {
    ($result:expr, $error_variant:pat, $context:expr) => {
        match $result {
            Err($error_variant) => {}
            Ok(_) => panic!("Expected error in {}", $context),
            Err(other) => panic!(
                "Expected {} but got {:?} in {}",
                stringify!($error_variant),
                other,
                $context
            ),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::Value;
    use crate::core::SqlstepError;

    #[test]
    fn test_database_fixture_creation() {
        let fixture = DatabaseFixture::new("test_create").unwrap();
        assert_eq!(fixture.name, "test_create");
        assert_eq!(fixture.connection.path(), ":memory:");
    }

    #[test]
    fn test_users_fixture() {
        let fixture = DatabaseFixture::with_users("test_users").unwrap();
        assert_eq!(
            fixture
                .connection
                .query_scalar("SELECT COUNT(*) FROM Users")
                .unwrap(),
            Value::Integer(2)
        );
        assert_eq!(fixture.connection.live_statements(), 0);
    }

    #[test]
    fn test_on_disk_fixture() {
        let fixture = DatabaseFixture::on_disk("test_disk").unwrap();
        assert!(fixture.connection.path().ends_with("test_disk.db"));
        fixture.create_users().unwrap();
        // recreating is allowed
        fixture.create_users().unwrap();
    }

    #[test]
    fn test_error_assertion_macro() {
        let result: Result<i32> = Err(SqlstepError::NotBound);
        crate::assert_sqlstep_error!(result, SqlstepError::NotBound, "macro test");
    }

    #[test]
    fn test_error_mentions() {
        let fixture = DatabaseFixture::new("test_mentions").unwrap();
        let result = fixture.connection.query_scalar("SELECT * FROM nowhere");
        error_testing::assert_status_code(&result, 1, "missing table");
        error_testing::assert_error_mentions(&result, "no such table", "missing table");
    }
}
