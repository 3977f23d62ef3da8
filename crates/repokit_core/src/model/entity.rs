//! Entity and key traits plus the per-collection mapping descriptor.
//!
//! # Responsibility
//! - Give every store a uniform way to read and assign entity keys.
//! - Validate collection/key-field names before they reach a store.
//!
//! # Invariants
//! - `EntityKey::is_unassigned()` keys are replaced by the store on insert.
//! - Collection names are safe to embed as SQL identifiers.

use crate::model::validation::FieldViolation;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use uuid::Uuid;

static COLLECTION_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("collection name pattern is valid")
});

static FIELD_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("field name pattern is valid")
});

/// Key type usable as an entity identity.
///
/// Keys serialize to a JSON string or integer; stores rely on that to map
/// them onto native identity columns.
pub trait EntityKey:
    Clone + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Returns true when the key is a placeholder that a store must replace.
    fn is_unassigned(&self) -> bool;

    /// Produces a fresh random key.
    fn generate() -> Self;
}

impl EntityKey for String {
    fn is_unassigned(&self) -> bool {
        self.is_empty()
    }

    fn generate() -> Self {
        Uuid::new_v4().to_string()
    }
}

impl EntityKey for i64 {
    fn is_unassigned(&self) -> bool {
        *self == 0
    }

    fn generate() -> Self {
        // Positive 63-bit value taken from a v4 UUID.
        let value = (Uuid::new_v4().as_u128() as i64) & i64::MAX;
        value.max(1)
    }
}

impl EntityKey for Uuid {
    fn is_unassigned(&self) -> bool {
        self.is_nil()
    }

    fn generate() -> Self {
        Uuid::new_v4()
    }
}

/// A uniquely keyed domain record that repositories can stage and persist.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identity type.
    type Key: EntityKey;

    /// Default collection name used by [`EntityMapping::of`].
    const COLLECTION: &'static str;

    /// Serialized field name holding the key.
    const KEY_FIELD: &'static str = "id";

    fn key(&self) -> &Self::Key;

    fn set_key(&mut self, key: Self::Key);

    /// Returns every field-level problem that should block persistence.
    fn validate(&self) -> Vec<FieldViolation> {
        Vec::new()
    }
}

/// Errors raised when building an [`EntityMapping`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    InvalidCollection(String),
    InvalidKeyField(String),
}

impl Display for MappingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCollection(name) => write!(
                f,
                "invalid collection name `{name}`; expected [A-Za-z_][A-Za-z0-9_]{{0,62}}"
            ),
            Self::InvalidKeyField(name) => write!(
                f,
                "invalid key field `{name}`; expected a top-level identifier"
            ),
        }
    }
}

impl Error for MappingError {}

/// Explicit per-store description of where an entity type lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMapping {
    collection: String,
    key_field: String,
}

impl EntityMapping {
    pub fn new(
        collection: impl Into<String>,
        key_field: impl Into<String>,
    ) -> Result<Self, MappingError> {
        let collection = collection.into();
        let key_field = key_field.into();

        if !COLLECTION_NAME.is_match(&collection) {
            return Err(MappingError::InvalidCollection(collection));
        }
        if !FIELD_NAME.is_match(&key_field) {
            return Err(MappingError::InvalidKeyField(key_field));
        }

        Ok(Self {
            collection,
            key_field,
        })
    }

    /// Builds the mapping from the entity's own defaults.
    pub fn of<E: Entity>() -> Result<Self, MappingError> {
        Self::new(E::COLLECTION, E::KEY_FIELD)
    }

    /// Same key field, different collection.
    pub fn renamed<E: Entity>(collection: impl Into<String>) -> Result<Self, MappingError> {
        Self::new(collection, E::KEY_FIELD)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }
}

/// Display form of a key for logs and change descriptors.
pub(crate) fn key_label<K: EntityKey>(key: &K) -> Option<String> {
    if key.is_unassigned() {
        None
    } else {
        Some(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKey, EntityMapping, MappingError};
    use uuid::Uuid;

    #[test]
    fn mapping_accepts_identifier_names() {
        let mapping = EntityMapping::new("user_profiles", "id").unwrap();
        assert_eq!(mapping.collection(), "user_profiles");
        assert_eq!(mapping.key_field(), "id");
    }

    #[test]
    fn mapping_rejects_sql_unsafe_collection() {
        let err = EntityMapping::new("users; DROP TABLE x", "id").unwrap_err();
        assert!(matches!(err, MappingError::InvalidCollection(_)));

        let err = EntityMapping::new("", "id").unwrap_err();
        assert!(matches!(err, MappingError::InvalidCollection(_)));
    }

    #[test]
    fn mapping_rejects_nested_key_field() {
        let err = EntityMapping::new("users", "meta.id").unwrap_err();
        assert_eq!(err, MappingError::InvalidKeyField("meta.id".to_string()));
    }

    #[test]
    fn unassigned_keys_are_detected() {
        assert!(String::new().is_unassigned());
        assert!(!"TEST_1".to_string().is_unassigned());
        assert!(0_i64.is_unassigned());
        assert!(Uuid::nil().is_unassigned());
    }

    #[test]
    fn generated_keys_are_assigned() {
        assert!(!String::generate().is_unassigned());
        assert!(i64::generate() > 0);
        assert!(!Uuid::generate().is_unassigned());
    }
}
