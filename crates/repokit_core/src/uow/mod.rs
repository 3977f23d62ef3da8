//! Unit of work: staging log, merge policy, and commit protocol.
//!
//! # Responsibility
//! - Record pending changes from one or more repositories without I/O.
//! - Replay them in staging order through repository persistence hooks.
//! - Notify attached repositories on rollback.
//!
//! # Invariants
//! - At most one net pending change per (repository, assigned key).
//! - A merged change keeps the position of its first staging.
//! - A failed commit never drops entries that were not durably applied.

pub mod change;
pub mod unit_of_work;
