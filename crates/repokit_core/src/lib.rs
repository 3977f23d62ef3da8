//! Generic repository + unit-of-work core for repokit.
//! Stores are pluggable; staging and commit semantics live here.

pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod store;
pub mod uow;

pub use db::{DbError, SqliteConfig, SqliteSession, SqliteTarget};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{Entity, EntityKey, EntityMapping, MappingError};
pub use model::validation::{EntityViolations, FieldViolation, ValidationErrors};
pub use query::filter::{CompareOp, Filter};
pub use query::sort::{SortDirection, SortKey};
pub use query::Query;
pub use repo::repository::{RepoError, RepoResult, Repository};
pub use store::memory::MemoryStore;
pub use store::sqlite::SqliteStore;
pub use store::{BatchSession, Store, StoreError, StoreResult};
pub use uow::change::{AppliedChange, ChangeKind, CommitReport, PendingChange};
pub use uow::unit_of_work::{ResetFailure, UnitOfWork, UnitOfWorkError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
