//! Pending change records and the merge policy applied while staging.

use crate::model::validation::EntityViolations;
use crate::store::{BatchSession, StoreResult};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Kind of a staged change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    New,
    Updated,
    Removed,
    /// Delete then insert: a removal followed by a re-add of the same key.
    Replaced,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Replaced => "replaced",
        }
    }
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Net change after staging `later` on top of `earlier` for the same key.
///
/// The later entity value always wins. `None` means the two cancel out.
pub(crate) fn merge(earlier: ChangeKind, later: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::{New, Removed, Replaced, Updated};

    match (earlier, later) {
        // Never persisted, nothing to delete.
        (New, Removed) => None,
        (New, _) => Some(New),
        (Updated | Replaced, Removed) => Some(Removed),
        (Updated, New | Replaced) => Some(Replaced),
        (Updated, Updated) => Some(Updated),
        (Replaced, _) => Some(Replaced),
        (Removed, Removed) => Some(Removed),
        // The row may or may not exist, so delete before inserting.
        (Removed, New | Replaced) => Some(Replaced),
        (Removed, Updated) => Some(Updated),
    }
}

/// Read-only descriptor of a staged change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub kind: ChangeKind,
    pub collection: String,
    /// `None` while the store has not assigned a key yet.
    pub key: Option<String>,
}

/// A change written by a successful commit, with its final key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub kind: ChangeKind,
    pub collection: String,
    pub key: String,
}

/// Outcome of a successful commit, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    applied: Vec<AppliedChange>,
}

impl CommitReport {
    pub(crate) fn new(applied: Vec<AppliedChange>) -> Self {
        Self { applied }
    }

    pub fn applied(&self) -> &[AppliedChange] {
        &self.applied
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Final keys of applied changes of `kind` in `collection`.
    pub fn keys(&self, collection: &str, kind: ChangeKind) -> Vec<&str> {
        self.applied
            .iter()
            .filter(|change| change.collection == collection && change.kind == kind)
            .map(|change| change.key.as_str())
            .collect()
    }
}

/// Type-erased staged change owned by the unit of work log.
pub(crate) trait StagedChange: Send {
    fn repository_id(&self) -> u64;

    fn collection(&self) -> &str;

    fn key_label(&self) -> Option<String>;

    fn kind(&self) -> ChangeKind;

    fn set_kind(&mut self, kind: ChangeKind);

    /// Violations of the staged entity; removals are never validated.
    fn validate(&self) -> Option<EntityViolations>;

    /// Runs the matching persistence hook and returns the final key.
    fn apply(&mut self) -> StoreResult<String>;

    fn session(&self) -> Option<Arc<dyn BatchSession>>;

    fn describe(&self) -> PendingChange {
        PendingChange {
            kind: self.kind(),
            collection: self.collection().to_string(),
            key: self.key_label(),
        }
    }
}

/// Repository registered for rollback notifications.
pub(crate) trait Participant: Send + Sync {
    fn id(&self) -> u64;

    fn collection(&self) -> &str;

    fn on_rollback(&self) -> StoreResult<()>;
}
