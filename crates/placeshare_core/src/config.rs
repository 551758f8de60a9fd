//! Runtime configuration for the place/user core.
//!
//! # Responsibility
//! - Describe where the store lives and how connections are tuned.
//! - Carry optional logging settings and default media references.
//!
//! # Invariants
//! - `CoreConfig::default()` targets an in-memory store and never logs to disk.

use std::path::PathBuf;
use std::time::Duration;

/// Default image attached to a place created without one.
pub const DEFAULT_PLACE_IMAGE: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb/1/10/Empire_State_Building_%28aerial_view%29.jpg/400px-Empire_State_Building_%28aerial_view%29.jpg";
/// Default avatar attached to every new user.
pub const DEFAULT_USER_IMAGE: &str = "https://picsum.photos/seed/picsum/400/400";
/// Default time a writer waits on a locked database before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage location for the SQLite database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// Private in-memory database, discarded with the connection.
    InMemory,
    /// Database file on disk, created on first open.
    File(PathBuf),
}

/// File logging settings consumed by [`crate::init_logging`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// One of `trace|debug|info|warn|error`.
    pub level: String,
    /// Absolute directory for rolling log files.
    pub dir: PathBuf,
}

/// Top-level core configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    pub database: DatabaseTarget,
    /// How long a write waits on another writer's lock before erroring.
    pub busy_timeout: Duration,
    /// `None` leaves logging uninitialized (library embedding, tests).
    pub log: Option<LogConfig>,
    pub default_place_image: String,
    pub default_user_image: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            database: DatabaseTarget::InMemory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            log: None,
            default_place_image: DEFAULT_PLACE_IMAGE.to_string(),
            default_user_image: DEFAULT_USER_IMAGE.to_string(),
        }
    }
}

impl CoreConfig {
    /// Builds a configuration for a database file, keeping other defaults.
    pub fn with_database_file(path: impl Into<PathBuf>) -> Self {
        Self {
            database: DatabaseTarget::File(path.into()),
            ..Self::default()
        }
    }
}
