//! Store collaborator contract and shipped adapters.
//!
//! # Responsibility
//! - Define the primitive insert/update/delete/query/get surface every
//!   backing store offers to repositories.
//! - Define the optional batch session a store can expose so one commit maps
//!   onto one native transaction.
//!
//! # Invariants
//! - `insert` assigns a generated key when the entity has none.
//! - `delete` of an absent key succeeds.
//! - `clear` empties the collection and is equivalent to deleting every key.
//! - `query` applies filter, then sort, then window.

pub mod memory;
mod sql;
pub mod sqlite;

use crate::db::DbError;
use crate::model::entity::Entity;
use crate::query::filter::Filter;
use crate::query::Query;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a backing store.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialization(serde_json::Error),
    /// Insert of a key that already exists.
    Conflict { collection: String, key: String },
    /// Update of a key that does not exist.
    Missing { collection: String, key: String },
    /// Persisted data cannot be decoded into a valid entity or key.
    InvalidData(String),
    /// The store cannot be reached or refused the operation.
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "entity serialization failed: {err}"),
            Self::Conflict { collection, key } => {
                write!(f, "{collection}: key `{key}` already exists")
            }
            Self::Missing { collection, key } => {
                write!(f, "{collection}: key `{key}` does not exist")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::Conflict { .. } => None,
            Self::Missing { .. } => None,
            Self::InvalidData(_) => None,
            Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Transactional scope a store can open around one commit.
///
/// Stores returning the same `session_id` share one scope; the unit of work
/// begins and finishes each scope exactly once per commit.
pub trait BatchSession: Send + Sync {
    fn session_id(&self) -> u64;
    fn begin(&self) -> StoreResult<()>;
    fn commit(&self) -> StoreResult<()>;
    fn rollback(&self) -> StoreResult<()>;
}

/// Backing store for one entity collection.
///
/// Methods take `&mut self` so stores can open their handles lazily.
pub trait Store<E: Entity>: Send {
    fn collection(&self) -> &str;

    fn insert(&mut self, entity: &mut E) -> StoreResult<()>;

    fn update(&mut self, entity: &E) -> StoreResult<()>;

    fn delete(&mut self, key: &E::Key) -> StoreResult<()>;

    fn query(&mut self, query: &Query) -> StoreResult<Vec<E>>;

    fn count(&mut self, filter: Option<&Filter>) -> StoreResult<u64>;

    fn get(&mut self, key: &E::Key) -> StoreResult<Option<E>>;

    /// Deletes every entity of the collection and returns how many were
    /// removed.
    fn clear(&mut self) -> StoreResult<u64> {
        let entities = self.query(&Query::new())?;
        for entity in &entities {
            self.delete(entity.key())?;
        }
        Ok(entities.len() as u64)
    }

    /// Batch scope joined during commits; `None` means every write is
    /// applied immediately and cannot be undone.
    fn session(&self) -> Option<Arc<dyn BatchSession>> {
        None
    }

    /// Rollback notification: release or re-acquire held resources.
    fn reset(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for repositories and sessions.
pub(crate) fn next_handle_id() -> u64 {
    NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed)
}
