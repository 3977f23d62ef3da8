//! Connection bootstrap for SQLite-backed stores.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Apply connection settings before handing the connection out.
//!
//! # Invariants
//! - Returned connections have the configured busy timeout.
//! - Every open attempt emits one `db_open` start and one ok/error event.

use super::{DbResult, SqliteConfig, SqliteTarget};
use log::{error, info};
use rusqlite::Connection;
use std::time::Instant;

/// Opens a connection for `config`.
///
/// # Side effects
/// - Creates the database file when it does not exist.
/// - Emits `db_open` logging events with duration and status.
pub fn open_connection(config: &SqliteConfig) -> DbResult<Connection> {
    let started_at = Instant::now();
    let mode = config.mode();
    info!("event=db_open module=db status=start mode={mode}");

    let opened = match &config.target {
        SqliteTarget::File(path) => Connection::open(path),
        SqliteTarget::Memory => Connection::open_in_memory(),
    };
    let conn = match opened {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    if let Err(err) = conn.busy_timeout(config.busy_timeout) {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_configure_failed error={}",
            started_at.elapsed().as_millis(),
            err
        );
        return Err(err.into());
    }

    info!(
        "event=db_open module=db status=ok mode={mode} duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::open_connection;
    use crate::db::SqliteConfig;
    use std::time::Duration;

    #[test]
    fn opens_memory_connection() {
        let conn = open_connection(&SqliteConfig::memory()).unwrap();
        let value: i64 = conn.query_row("SELECT 1;", [], |row| row.get(0)).unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn opens_file_connection_and_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");
        let config = SqliteConfig::file(&path).with_busy_timeout(Duration::from_millis(250));

        let conn = open_connection(&config).unwrap();
        conn.execute_batch("CREATE TABLE probe (id INTEGER);").unwrap();
        assert!(path.exists());
    }
}
