//! In-process document store.
//!
//! Keeps serialized documents keyed by entity key and evaluates every filter
//! and sort in process. Writes are applied immediately; there is no batch
//! session, so a failed commit keeps whatever was applied before the failure.

use crate::model::entity::{Entity, EntityKey, EntityMapping, MappingError};
use crate::query::filter::Filter;
use crate::query::{count_in_process, run_in_process, Query};
use crate::store::{Store, StoreError, StoreResult};
use serde_json::Value;
use std::collections::BTreeMap;

pub struct MemoryStore<E: Entity> {
    mapping: EntityMapping,
    documents: BTreeMap<E::Key, Value>,
}

impl<E: Entity> MemoryStore<E> {
    pub fn new(mapping: EntityMapping) -> Self {
        Self {
            mapping,
            documents: BTreeMap::new(),
        }
    }

    /// Store using the entity's default collection mapping.
    pub fn for_entity() -> Result<Self, MappingError> {
        Ok(Self::new(EntityMapping::of::<E>()?))
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn decode(document: Value) -> StoreResult<E> {
        Ok(serde_json::from_value(document)?)
    }
}

impl<E: Entity> Store<E> for MemoryStore<E> {
    fn collection(&self) -> &str {
        self.mapping.collection()
    }

    fn insert(&mut self, entity: &mut E) -> StoreResult<()> {
        if entity.key().is_unassigned() {
            let mut key = E::Key::generate();
            while self.documents.contains_key(&key) {
                key = E::Key::generate();
            }
            entity.set_key(key);
        }

        let key = entity.key().clone();
        if self.documents.contains_key(&key) {
            return Err(StoreError::Conflict {
                collection: self.mapping.collection().to_string(),
                key: key.to_string(),
            });
        }

        let document = serde_json::to_value(&*entity)?;
        self.documents.insert(key, document);
        Ok(())
    }

    fn update(&mut self, entity: &E) -> StoreResult<()> {
        let document = serde_json::to_value(entity)?;
        match self.documents.get_mut(entity.key()) {
            Some(slot) => {
                *slot = document;
                Ok(())
            }
            None => Err(StoreError::Missing {
                collection: self.mapping.collection().to_string(),
                key: entity.key().to_string(),
            }),
        }
    }

    fn delete(&mut self, key: &E::Key) -> StoreResult<()> {
        self.documents.remove(key);
        Ok(())
    }

    fn query(&mut self, query: &Query) -> StoreResult<Vec<E>> {
        let rows = self
            .documents
            .iter()
            .map(|(key, document)| (key.clone(), document.clone()))
            .collect();

        run_in_process(rows, query)
            .into_iter()
            .map(|(_, document)| Self::decode(document))
            .collect()
    }

    fn count(&mut self, filter: Option<&Filter>) -> StoreResult<u64> {
        Ok(count_in_process(self.documents.values(), filter))
    }

    fn get(&mut self, key: &E::Key) -> StoreResult<Option<E>> {
        self.documents
            .get(key)
            .cloned()
            .map(Self::decode)
            .transpose()
    }

    fn clear(&mut self) -> StoreResult<u64> {
        let removed = self.documents.len() as u64;
        self.documents.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::model::entity::Entity;
    use crate::query::filter::Filter;
    use crate::query::Query;
    use crate::store::{Store, StoreError};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
    }

    impl Entity for Note {
        type Key = String;
        const COLLECTION: &'static str = "notes";

        fn key(&self) -> &String {
            &self.id
        }

        fn set_key(&mut self, key: String) {
            self.id = key;
        }
    }

    fn note(id: &str, body: &str) -> Note {
        Note {
            id: id.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn insert_assigns_missing_key() {
        let mut store = MemoryStore::<Note>::for_entity().unwrap();
        let mut entity = note("", "generated");
        store.insert(&mut entity).unwrap();

        assert!(!entity.id.is_empty());
        assert_eq!(store.get(&entity.id).unwrap(), Some(entity));
    }

    #[test]
    fn duplicate_insert_conflicts_and_missing_update_fails() {
        let mut store = MemoryStore::<Note>::for_entity().unwrap();
        store.insert(&mut note("a", "one")).unwrap();

        let err = store.insert(&mut note("a", "two")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { ref key, .. } if key == "a"));

        let err = store.update(&note("b", "nope")).unwrap_err();
        assert!(matches!(err, StoreError::Missing { ref key, .. } if key == "b"));
    }

    #[test]
    fn delete_is_idempotent() {
        let mut store = MemoryStore::<Note>::for_entity().unwrap();
        store.insert(&mut note("a", "one")).unwrap();
        store.delete(&"a".to_string()).unwrap();
        store.delete(&"a".to_string()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn clear_reports_removed_count() {
        let mut store = MemoryStore::<Note>::for_entity().unwrap();
        store.insert(&mut note("a", "one")).unwrap();
        store.insert(&mut note("b", "two")).unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.is_empty());
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn query_and_count_share_filter_semantics() {
        let mut store = MemoryStore::<Note>::for_entity().unwrap();
        for (id, body) in [("c", "x"), ("a", "y"), ("b", "x")] {
            store.insert(&mut note(id, body)).unwrap();
        }

        let filter = Filter::eq("body", "x");
        let found = store.query(&Query::new().filter(filter.clone())).unwrap();
        let ids: Vec<_> = found.iter().map(|note| note.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(store.count(Some(&filter)).unwrap(), 2);
        assert_eq!(store.count(None).unwrap(), 3);
    }
}
