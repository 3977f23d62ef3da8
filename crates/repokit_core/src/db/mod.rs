//! SQLite connection configuration, bootstrap and shared sessions.
//!
//! # Responsibility
//! - Describe where a SQLite-backed store lives (`SqliteConfig`).
//! - Open and configure connections lazily, on first use.
//! - Own the connection behind a `SqliteSession` that can be re-acquired
//!   after a rollback.
//!
//! # Invariants
//! - Returned connections have the configured busy timeout applied.
//! - A session holds at most one open connection at a time.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

mod open;
mod session;

pub use open::open_connection;
pub use session::SqliteSession;

pub type DbResult<T> = Result<T, DbError>;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    /// Batch operation issued in the wrong session state.
    InvalidState(&'static str),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::InvalidState(message) => write!(f, "invalid session state: {message}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::InvalidState(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Where a SQLite database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteTarget {
    File(PathBuf),
    /// Private in-memory database; contents live as long as the connection.
    Memory,
}

/// Connection settings for SQLite-backed stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    pub target: SqliteTarget,
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            target: SqliteTarget::File(path.into()),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn memory() -> Self {
        Self {
            target: SqliteTarget::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub(crate) fn mode(&self) -> &'static str {
        match self.target {
            SqliteTarget::File(_) => "file",
            SqliteTarget::Memory => "memory",
        }
    }
}
