//! Staging log and commit/rollback coordinator.
//!
//! # Responsibility
//! - Stage new/updated/removed entities from attached repositories.
//! - Validate, then apply staged changes in order inside batch sessions.
//! - Discard staged changes and notify repositories on rollback.
//!
//! # Invariants
//! - Staging never performs store I/O.
//! - Validation failures block the whole commit before any write.
//! - After a failed commit the log keeps the failing entry, every
//!   unattempted entry, and every entry whose batch session was rolled back.
//! - The log lock is never held across store calls.
//! - Attached repositories are held weakly; dropping one releases its store.

use crate::model::entity::Entity;
use crate::model::validation::ValidationErrors;
use crate::repo::repository::Repository;
use crate::store::{BatchSession, Store, StoreError};
use crate::uow::change::{
    merge, AppliedChange, ChangeKind, CommitReport, Participant, PendingChange, StagedChange,
};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

/// Failure of a commit or rollback.
#[derive(Debug)]
pub enum UnitOfWorkError {
    /// Staged entities failed validation; nothing was written.
    Validation(ValidationErrors),
    /// A persistence hook failed; remaining changes were not attempted.
    Persist {
        kind: ChangeKind,
        collection: String,
        key: Option<String>,
        source: StoreError,
    },
    /// A batch session could not begin or commit.
    Session(StoreError),
    /// One or more repositories failed to reset after rollback.
    Reset(Vec<ResetFailure>),
}

/// Reset failure of one repository during rollback.
#[derive(Debug)]
pub struct ResetFailure {
    pub collection: String,
    pub source: StoreError,
}

impl Display for UnitOfWorkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Persist {
                kind,
                collection,
                key,
                source,
            } => write!(
                f,
                "failed to persist {kind} entity {collection}({}): {source}",
                key.as_deref().unwrap_or("<unassigned>")
            ),
            Self::Session(err) => write!(f, "batch session failed: {err}"),
            Self::Reset(failures) => {
                write!(f, "rollback notification failed for")?;
                for (index, failure) in failures.iter().enumerate() {
                    let separator = if index == 0 { " " } else { ", " };
                    write!(f, "{separator}{}: {}", failure.collection, failure.source)?;
                }
                Ok(())
            }
        }
    }
}

impl Error for UnitOfWorkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Persist { source, .. } => Some(source),
            Self::Session(err) => Some(err),
            Self::Reset(failures) => failures
                .first()
                .map(|failure| &failure.source as &(dyn Error + 'static)),
        }
    }
}

#[derive(Default)]
struct State {
    log: Vec<Box<dyn StagedChange>>,
    /// Repositories by id; dropped repositories are pruned on attach.
    participants: Vec<(u64, Weak<dyn Participant>)>,
}

impl State {
    fn live_participants(&self) -> Vec<Arc<dyn Participant>> {
        self.participants
            .iter()
            .filter_map(|(_, participant)| participant.upgrade())
            .collect()
    }
}

/// Shared handle over one staging log.
///
/// Clones refer to the same log, so repositories of different entity types
/// can batch their changes into one commit.
#[derive(Clone, Default)]
pub struct UnitOfWork {
    state: Arc<Mutex<State>>,
}

impl Debug for UnitOfWork {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("UnitOfWork")
            .field("pending", &state.log.len())
            .field(
                "participants",
                &state
                    .participants
                    .iter()
                    .filter(|(_, participant)| participant.strong_count() > 0)
                    .count(),
            )
            .finish()
    }
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_new<E, S>(&self, repository: &Repository<E, S>, entity: E)
    where
        E: Entity,
        S: Store<E> + 'static,
    {
        self.register(repository, ChangeKind::New, entity);
    }

    pub fn register_updated<E, S>(&self, repository: &Repository<E, S>, entity: E)
    where
        E: Entity,
        S: Store<E> + 'static,
    {
        self.register(repository, ChangeKind::Updated, entity);
    }

    pub fn register_removed<E, S>(&self, repository: &Repository<E, S>, entity: E)
    where
        E: Entity,
        S: Store<E> + 'static,
    {
        self.register(repository, ChangeKind::Removed, entity);
    }

    /// Number of net pending changes.
    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().log.is_empty()
    }

    /// Pending changes in staging order.
    pub fn pending(&self) -> Vec<PendingChange> {
        self.lock().log.iter().map(|change| change.describe()).collect()
    }

    /// Validates and applies every staged change, then clears the log.
    ///
    /// The log is taken out of the handle while stores run, so store code may
    /// call back into this unit of work. Changes staged meanwhile are merged
    /// after any retained entries.
    ///
    /// # Errors
    /// - `Validation` when any staged entity reports violations.
    /// - `Persist` for the first failing persistence hook.
    /// - `Session` when a batch session cannot begin or commit.
    pub fn commit(&self) -> Result<CommitReport, UnitOfWorkError> {
        let started_at = Instant::now();
        let mut log = {
            let mut state = self.lock();
            if state.log.is_empty() {
                debug!("event=uow_commit module=uow status=ok changes=0");
                return Ok(CommitReport::default());
            }

            let violations: Vec<_> = state
                .log
                .iter()
                .filter_map(|change| change.validate())
                .collect();
            if !violations.is_empty() {
                let errors = ValidationErrors::new(violations);
                warn!(
                    "event=uow_commit module=uow status=error stage=validate changes={} violations={}",
                    state.log.len(),
                    errors.violation_count()
                );
                return Err(UnitOfWorkError::Validation(errors));
            }
            std::mem::take(&mut state.log)
        };

        let result = apply_log(&mut log, started_at);
        self.restore(log);
        result
    }

    /// Discards every staged change and notifies attached repositories.
    ///
    /// The log is cleared even when a repository fails to reset.
    pub fn rollback(&self) -> Result<(), UnitOfWorkError> {
        let (discarded, participants) = {
            let mut state = self.lock();
            (std::mem::take(&mut state.log), state.live_participants())
        };
        let discarded = discarded.len();

        let failures: Vec<_> = participants
            .iter()
            .filter_map(|participant| {
                participant.on_rollback().err().map(|source| ResetFailure {
                    collection: participant.collection().to_string(),
                    source,
                })
            })
            .collect();

        if failures.is_empty() {
            info!(
                "event=uow_rollback module=uow status=ok discarded={} notified={}",
                discarded,
                participants.len()
            );
            Ok(())
        } else {
            warn!(
                "event=uow_rollback module=uow status=error discarded={} failed={}",
                discarded,
                failures.len()
            );
            Err(UnitOfWorkError::Reset(failures))
        }
    }

    /// Registers `participant` for rollback notifications without keeping
    /// its repository alive.
    pub(crate) fn attach(&self, participant: Arc<dyn Participant>) {
        let mut state = self.lock();
        state
            .participants
            .retain(|(_, known)| known.strong_count() > 0);
        let id = participant.id();
        if !state.participants.iter().any(|(known, _)| *known == id) {
            debug!(
                "event=uow_attach module=uow status=ok collection={} repository={}",
                participant.collection(),
                id
            );
            state.participants.push((id, Arc::downgrade(&participant)));
        }
    }

    fn register<E, S>(&self, repository: &Repository<E, S>, kind: ChangeKind, entity: E)
    where
        E: Entity,
        S: Store<E> + 'static,
    {
        self.attach(repository.participant());
        self.stage(repository.staged(kind, entity));
    }

    fn stage(&self, change: Box<dyn StagedChange>) {
        stage_into(&mut self.lock().log, change);
    }

    /// Puts entries retained by a failed commit back ahead of anything
    /// staged while the commit ran.
    fn restore(&self, retained: Vec<Box<dyn StagedChange>>) {
        if retained.is_empty() {
            return;
        }
        let mut state = self.lock();
        let newer = std::mem::replace(&mut state.log, retained);
        for change in newer {
            stage_into(&mut state.log, change);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs the commit protocol over `log`, leaving only retained entries in it.
fn apply_log(
    log: &mut Vec<Box<dyn StagedChange>>,
    started_at: Instant,
) -> Result<CommitReport, UnitOfWorkError> {
    let staged = log.len();
    let mut sessions: Vec<Arc<dyn BatchSession>> = Vec::new();
    let mut entry_sessions: Vec<Option<u64>> = Vec::with_capacity(staged);
    for change in log.iter() {
        let session = change.session();
        entry_sessions.push(session.as_ref().map(|session| session.session_id()));
        if let Some(session) = session {
            let id = session.session_id();
            if !sessions.iter().any(|open| open.session_id() == id) {
                sessions.push(session);
            }
        }
    }

    for (index, session) in sessions.iter().enumerate() {
        if let Err(err) = session.begin() {
            rollback_sessions(&sessions[..index]);
            warn!(
                "event=uow_commit module=uow status=error stage=begin session={} error={}",
                session.session_id(),
                err
            );
            return Err(UnitOfWorkError::Session(err));
        }
    }

    let mut applied = Vec::with_capacity(staged);
    let mut failure = None;
    for (index, change) in log.iter_mut().enumerate() {
        match change.apply() {
            Ok(key) => applied.push(AppliedChange {
                kind: change.kind(),
                collection: change.collection().to_string(),
                key,
            }),
            Err(source) => {
                failure = Some((index, source));
                break;
            }
        }
    }

    if let Some((failed_index, source)) = failure {
        rollback_sessions(&sessions);

        let failed = log[failed_index].describe();
        let mut position = 0;
        log.retain(|_| {
            let keep = position >= failed_index || entry_sessions[position].is_some();
            position += 1;
            keep
        });

        warn!(
            "event=uow_commit module=uow status=error stage=apply kind={} collection={} retained={} duration_ms={} error={}",
            failed.kind,
            failed.collection,
            log.len(),
            started_at.elapsed().as_millis(),
            source
        );
        return Err(UnitOfWorkError::Persist {
            kind: failed.kind,
            collection: failed.collection,
            key: failed.key,
            source,
        });
    }

    let mut failed_sessions = Vec::new();
    let mut first_error = None;
    for session in &sessions {
        if let Err(err) = session.commit() {
            warn!(
                "event=uow_commit module=uow status=error stage=session_commit session={} error={}",
                session.session_id(),
                err
            );
            failed_sessions.push(session.session_id());
            first_error.get_or_insert(err);
        }
    }

    if let Some(err) = first_error {
        let mut position = 0;
        log.retain(|_| {
            let keep = entry_sessions[position].is_some_and(|id| failed_sessions.contains(&id));
            position += 1;
            keep
        });
        return Err(UnitOfWorkError::Session(err));
    }

    log.clear();
    info!(
        "event=uow_commit module=uow status=ok changes={} sessions={} duration_ms={}",
        applied.len(),
        sessions.len(),
        started_at.elapsed().as_millis()
    );
    Ok(CommitReport::new(applied))
}

/// Stages `change` into `log`, merging it with a pending change for the same
/// repository and key.
fn stage_into(log: &mut Vec<Box<dyn StagedChange>>, mut change: Box<dyn StagedChange>) {
    let repository_id = change.repository_id();
    let key = change.key_label();

    let existing = key.as_ref().and_then(|key| {
        log.iter().position(|staged| {
            staged.repository_id() == repository_id && staged.key_label().as_ref() == Some(key)
        })
    });

    let Some(index) = existing else {
        debug!(
            "event=uow_stage module=uow status=ok kind={} collection={}",
            change.kind(),
            change.collection()
        );
        log.push(change);
        return;
    };

    let earlier = log[index].kind();
    match merge(earlier, change.kind()) {
        Some(kind) => {
            change.set_kind(kind);
            debug!(
                "event=uow_stage module=uow status=merged earlier={} net={} collection={}",
                earlier,
                kind,
                change.collection()
            );
            log[index] = change;
        }
        None => {
            debug!(
                "event=uow_stage module=uow status=cancelled collection={}",
                change.collection()
            );
            log.remove(index);
        }
    }
}

fn rollback_sessions(sessions: &[Arc<dyn BatchSession>]) {
    for session in sessions {
        if let Err(err) = session.rollback() {
            warn!(
                "event=uow_session_rollback module=uow status=error session={} error={}",
                session.session_id(),
                err
            );
        }
    }
}
