/// Logging Module
///
/// The library itself only emits `tracing` events; applications and tests
/// that want to see them install the fmt subscriber through `init_logging`.

use crate::config::LoggingConfig;
use crate::core::{Result, SqlstepError};
use tracing::level_filters::LevelFilter;

/// Parses a level name (case-insensitive): trace, debug, info, warn, error
/// or off.
pub fn parse_level(level: &str) -> Result<LevelFilter> {
    level
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| SqlstepError::Config(format!("unsupported log level '{}'", level)))
}

/// Installs a global fmt subscriber at the configured level.
///
/// An already-installed global subscriber is kept, so calling this more
/// than once is harmless.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level)?;
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();
    Ok(())
}
