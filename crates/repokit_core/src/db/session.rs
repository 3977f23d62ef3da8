//! Lazily opened, re-acquirable SQLite connection.
//!
//! # Responsibility
//! - Open the connection on first use and keep it for later operations.
//! - Bracket a unit-of-work commit in one native transaction.
//! - Drop and re-acquire file connections when a rollback is signalled.
//!
//! # Invariants
//! - At most one batch transaction is open per session.
//! - `generation` changes whenever previously created schema may be gone
//!   (new connection or rolled back transaction).

use super::{open_connection, DbError, DbResult, SqliteConfig, SqliteTarget};
use crate::store::{next_handle_id, BatchSession, StoreResult};
use log::{info, warn};
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct SessionState {
    conn: Option<Connection>,
    in_batch: bool,
    generation: u64,
}

/// Connection owner shared by the stores that should commit together.
///
/// A `SqliteStore` created with [`crate::SqliteStore::open`] gets a private
/// session; stores created with [`crate::SqliteStore::with_session`] share the
/// caller's session and join its batch transaction during a commit.
pub struct SqliteSession {
    id: u64,
    config: SqliteConfig,
    state: Mutex<SessionState>,
}

impl SqliteSession {
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            id: next_handle_id(),
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn shared(config: SqliteConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// Returns whether a connection is currently held.
    pub fn is_open(&self) -> bool {
        self.lock().conn.is_some()
    }

    /// Returns whether a batch transaction is currently open.
    pub fn in_batch(&self) -> bool {
        self.lock().in_batch
    }

    /// Runs `f` on the connection, opening it first when needed.
    ///
    /// `f` also receives the current connection generation.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection, u64) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut guard = self.lock();
        let (conn, generation) = ensure_open(&mut guard, &self.config)?;
        f(conn, generation)
    }

    /// Rolls back any open batch and re-acquires file connections lazily.
    ///
    /// In-memory connections are kept, since closing them discards the data.
    pub fn reset(&self) -> StoreResult<()> {
        let mut state = self.lock();
        let mut outcome = Ok(());

        if state.in_batch {
            if let Some(conn) = state.conn.as_ref() {
                if let Err(err) = conn.execute_batch("ROLLBACK;") {
                    warn!(
                        "event=session_reset module=db status=error session={} error={}",
                        self.id, err
                    );
                    outcome = Err(DbError::from(err).into());
                }
            }
            state.in_batch = false;
        }

        let reopened = matches!(self.config.target, SqliteTarget::File(_)) && state.conn.is_some();
        if reopened {
            state.conn = None;
        }
        state.generation += 1;

        info!(
            "event=session_reset module=db status=ok session={} mode={} released_connection={}",
            self.id,
            self.config.mode(),
            reopened
        );
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BatchSession for SqliteSession {
    fn session_id(&self) -> u64 {
        self.id
    }

    fn begin(&self) -> StoreResult<()> {
        let mut guard = self.lock();
        if guard.in_batch {
            return Err(DbError::InvalidState("batch transaction already open").into());
        }

        let (conn, _) = ensure_open(&mut guard, &self.config)?;
        conn.execute_batch("BEGIN IMMEDIATE;")
            .map_err(DbError::from)?;
        guard.in_batch = true;
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut state = self.lock();
        if !state.in_batch {
            return Err(DbError::InvalidState("no batch transaction to commit").into());
        }
        state.in_batch = false;

        let Some(conn) = state.conn.as_ref() else {
            return Err(DbError::InvalidState("connection closed during batch").into());
        };
        if let Err(err) = conn.execute_batch("COMMIT;") {
            // A failed COMMIT can leave the transaction open.
            let _ = conn.execute_batch("ROLLBACK;");
            state.generation += 1;
            return Err(DbError::from(err).into());
        }
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut state = self.lock();
        if !state.in_batch {
            return Ok(());
        }
        state.in_batch = false;
        state.generation += 1;

        match state.conn.as_ref() {
            Some(conn) => conn
                .execute_batch("ROLLBACK;")
                .map_err(|err| DbError::from(err).into()),
            None => Ok(()),
        }
    }
}

fn ensure_open<'a>(
    state: &'a mut SessionState,
    config: &SqliteConfig,
) -> DbResult<(&'a Connection, u64)> {
    if state.conn.is_none() {
        state.conn = Some(open_connection(config)?);
        state.generation += 1;
    }

    let generation = state.generation;
    state
        .conn
        .as_ref()
        .map(|conn| (conn, generation))
        .ok_or(DbError::InvalidState("connection unavailable"))
}
