//! Generic repository over any [`Store`].
//!
//! # Responsibility
//! - Provide `add`/`remove`/`set` staging calls and windowed reads.
//! - Offer `clear_all` as the one immediate write.
//! - Expose persistence hooks only to the unit of work.
//!
//! # Invariants
//! - Each persistence hook performs exactly one store call.
//! - The store is owned by one repository; clones are not handed out.

use crate::model::entity::{key_label, Entity, EntityKey};
use crate::model::validation::EntityViolations;
use crate::query::filter::Filter;
use crate::query::sort::SortKey;
use crate::query::Query;
use crate::store::{next_handle_id, BatchSession, Store, StoreError, StoreResult};
use crate::uow::change::{ChangeKind, Participant, StagedChange};
use crate::uow::unit_of_work::UnitOfWork;
use log::{debug, info};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for staging and read operations.
#[derive(Debug)]
pub enum RepoError {
    /// Mutation attempted before a unit of work was attached.
    Detached { collection: String },
    Store(StoreError),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detached { collection } => write!(
                f,
                "repository `{collection}` has no unit of work attached"
            ),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Detached { .. } => None,
            Self::Store(err) => Some(err),
        }
    }
}

impl From<StoreError> for RepoError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

pub(crate) struct RepositoryCore<E: Entity, S: Store<E>> {
    id: u64,
    collection: String,
    store: Mutex<S>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity, S: Store<E>> RepositoryCore<E, S> {
    fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn persist_new_item(&self, entity: &mut E) -> StoreResult<()> {
        self.store().insert(entity)
    }

    pub(crate) fn persist_updated_item(&self, entity: &E) -> StoreResult<()> {
        self.store().update(entity)
    }

    pub(crate) fn persist_deleted_item(&self, entity: &E) -> StoreResult<()> {
        self.store().delete(entity.key())
    }
}

impl<E: Entity, S: Store<E>> Participant for RepositoryCore<E, S> {
    fn id(&self) -> u64 {
        self.id
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn on_rollback(&self) -> StoreResult<()> {
        self.store().reset()
    }
}

struct RepositoryChange<E: Entity, S: Store<E>> {
    core: Arc<RepositoryCore<E, S>>,
    kind: ChangeKind,
    entity: E,
}

impl<E: Entity, S: Store<E> + 'static> StagedChange for RepositoryChange<E, S> {
    fn repository_id(&self) -> u64 {
        self.core.id
    }

    fn collection(&self) -> &str {
        &self.core.collection
    }

    fn key_label(&self) -> Option<String> {
        key_label(self.entity.key())
    }

    fn kind(&self) -> ChangeKind {
        self.kind
    }

    fn set_kind(&mut self, kind: ChangeKind) {
        self.kind = kind;
    }

    fn validate(&self) -> Option<EntityViolations> {
        if self.kind == ChangeKind::Removed {
            return None;
        }

        let violations = self.entity.validate();
        if violations.is_empty() {
            return None;
        }
        Some(EntityViolations {
            collection: self.core.collection.clone(),
            key: self.key_label(),
            violations,
        })
    }

    fn apply(&mut self) -> StoreResult<String> {
        match self.kind {
            ChangeKind::New => self.core.persist_new_item(&mut self.entity)?,
            ChangeKind::Updated => self.core.persist_updated_item(&self.entity)?,
            ChangeKind::Removed => self.core.persist_deleted_item(&self.entity)?,
            ChangeKind::Replaced => {
                self.core.persist_deleted_item(&self.entity)?;
                self.core.persist_new_item(&mut self.entity)?;
            }
        }
        Ok(self.entity.key().to_string())
    }

    fn session(&self) -> Option<Arc<dyn BatchSession>> {
        self.core.store().session()
    }
}

/// Generic CRUD and query façade for one entity collection.
///
/// Writes are staged on the attached [`UnitOfWork`] and reach the store only
/// on commit. Reads always go to the store.
pub struct Repository<E: Entity, S: Store<E>> {
    core: Arc<RepositoryCore<E, S>>,
    unit_of_work: Option<UnitOfWork>,
}

impl<E: Entity, S: Store<E>> Debug for Repository<E, S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.core.id)
            .field("collection", &self.core.collection)
            .field("attached", &self.unit_of_work.is_some())
            .finish()
    }
}

impl<E: Entity, S: Store<E> + 'static> Repository<E, S> {
    /// Creates a detached repository owning `store`.
    pub fn new(store: S) -> Self {
        let collection = store.collection().to_string();
        Self {
            core: Arc::new(RepositoryCore {
                id: next_handle_id(),
                collection,
                store: Mutex::new(store),
                _entity: PhantomData,
            }),
            unit_of_work: None,
        }
    }

    pub fn with_unit_of_work(store: S, unit_of_work: &UnitOfWork) -> Self {
        let mut repository = Self::new(store);
        repository.set_unit_of_work(unit_of_work);
        repository
    }

    pub fn collection(&self) -> &str {
        &self.core.collection
    }

    /// Attaches `unit_of_work` and registers for its rollback notifications.
    pub fn set_unit_of_work(&mut self, unit_of_work: &UnitOfWork) {
        unit_of_work.attach(self.participant());
        self.unit_of_work = Some(unit_of_work.clone());
    }

    pub fn unit_of_work(&self) -> Option<&UnitOfWork> {
        self.unit_of_work.as_ref()
    }

    /// Stages `entity` as new.
    ///
    /// # Errors
    /// - `Detached` when no unit of work is attached.
    pub fn add(&self, entity: E) -> RepoResult<()> {
        self.attached()?.register_new(self, entity);
        Ok(())
    }

    /// Stages removal of `entity`.
    pub fn remove(&self, entity: E) -> RepoResult<()> {
        self.attached()?.register_removed(self, entity);
        Ok(())
    }

    /// Keyed assignment: stages `entity` as the new value stored under `key`.
    pub fn set(&self, key: E::Key, mut entity: E) -> RepoResult<()> {
        let unit_of_work = self.attached()?;
        entity.set_key(key);
        unit_of_work.register_updated(self, entity);
        Ok(())
    }

    /// Deletes every committed entity right away and returns how many were
    /// removed.
    ///
    /// Bypasses the unit of work; staged changes stay pending.
    pub fn clear_all(&self) -> RepoResult<u64> {
        let removed = self.core.store().clear()?;
        info!(
            "event=repo_clear module=repo status=ok collection={} removed={}",
            self.core.collection, removed
        );
        Ok(removed)
    }

    /// Counts committed entities matching `filter`.
    pub fn count_all(&self, filter: Option<&Filter>) -> RepoResult<u64> {
        Ok(self.core.store().count(filter)?)
    }

    /// Windowed read in store order; `usize::MAX` as `limit` means unbounded.
    pub fn find_all(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&Filter>,
    ) -> RepoResult<Vec<E>> {
        self.find(&Query::windowed(offset, limit, filter))
    }

    /// Windowed read sorted ascending by `field`, ties by key.
    pub fn find_all_ascending(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&Filter>,
        field: &str,
    ) -> RepoResult<Vec<E>> {
        self.find(&Query::windowed(offset, limit, filter).sort(SortKey::ascending(field)))
    }

    /// Windowed read sorted descending by `field`, ties by key.
    pub fn find_all_descending(
        &self,
        offset: usize,
        limit: usize,
        filter: Option<&Filter>,
        field: &str,
    ) -> RepoResult<Vec<E>> {
        self.find(&Query::windowed(offset, limit, filter).sort(SortKey::descending(field)))
    }

    pub fn find(&self, query: &Query) -> RepoResult<Vec<E>> {
        debug!(
            "event=repo_find module=repo status=start collection={} offset={} limit={:?} sorted={}",
            self.core.collection,
            query.offset,
            query.limit,
            query.sort.is_some()
        );
        Ok(self.core.store().query(query)?)
    }

    /// Returns the committed entity stored under `key`, if any.
    pub fn find_by(&self, key: &E::Key) -> RepoResult<Option<E>> {
        if key.is_unassigned() {
            return Ok(None);
        }
        Ok(self.core.store().get(key)?)
    }

    pub(crate) fn participant(&self) -> Arc<dyn Participant> {
        self.core.clone()
    }

    pub(crate) fn staged(&self, kind: ChangeKind, entity: E) -> Box<dyn StagedChange> {
        Box::new(RepositoryChange {
            core: Arc::clone(&self.core),
            kind,
            entity,
        })
    }

    fn attached(&self) -> RepoResult<&UnitOfWork> {
        self.unit_of_work.as_ref().ok_or_else(|| RepoError::Detached {
            collection: self.core.collection.clone(),
        })
    }
}
