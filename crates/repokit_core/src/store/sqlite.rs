//! SQLite document-table store.
//!
//! # Responsibility
//! - Persist entities as JSON documents in one table per collection.
//! - Translate filters and sort keys into SQL when possible, and evaluate in
//!   process otherwise.
//! - Create the collection table lazily, on first use of each connection.
//!
//! # Invariants
//! - Table layout: `entity_key` (primary key, native key type) and
//!   `document` (JSON text).
//! - Native and in-process evaluation return the same rows in the same order.
//! - Only stores built on a shared session join batch transactions.

use crate::db::{SqliteConfig, SqliteSession};
use crate::model::entity::{Entity, EntityKey, EntityMapping, MappingError};
use crate::query::filter::Filter;
use crate::query::{count_in_process, run_in_process, Query};
use crate::store::sql::{translate_filter, translate_sort, SqlClause, DOCUMENT_COLUMN, KEY_COLUMN};
use crate::store::{BatchSession, Store, StoreError, StoreResult};
use log::{debug, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct SqliteStore<E: Entity> {
    mapping: EntityMapping,
    session: Arc<SqliteSession>,
    batched: bool,
    prepared_generation: Option<u64>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> SqliteStore<E> {
    /// Store with its own lazily opened connection. Writes autocommit.
    pub fn open(config: SqliteConfig, mapping: EntityMapping) -> Self {
        Self {
            mapping,
            session: Arc::new(SqliteSession::new(config)),
            batched: false,
            prepared_generation: None,
            _entity: PhantomData,
        }
    }

    /// Private store using the entity's default collection mapping.
    pub fn for_entity(config: SqliteConfig) -> Result<Self, MappingError> {
        Ok(Self::open(config, EntityMapping::of::<E>()?))
    }

    /// Store on a caller-owned session; commits run in one transaction per
    /// session.
    pub fn with_session(session: Arc<SqliteSession>, mapping: EntityMapping) -> Self {
        Self {
            mapping,
            session,
            batched: true,
            prepared_generation: None,
            _entity: PhantomData,
        }
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    pub fn sqlite_session(&self) -> &Arc<SqliteSession> {
        &self.session
    }

    fn table(&self) -> String {
        format!("\"{}\"", self.mapping.collection())
    }

    /// Runs `f` on a connection whose collection table exists.
    fn run<T>(&mut self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let table = self.table();
        let collection = self.mapping.collection();
        let prepared_generation = &mut self.prepared_generation;

        self.session.with_connection(|conn, generation| {
            if *prepared_generation != Some(generation) {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        {KEY_COLUMN} PRIMARY KEY NOT NULL,
                        {DOCUMENT_COLUMN} TEXT NOT NULL
                    );"
                ))?;
                *prepared_generation = Some(generation);
                info!(
                    "event=store_prepare module=store status=ok collection={collection} generation={generation}"
                );
            }
            f(conn)
        })
    }

    fn key_to_sql(&self, key: &E::Key) -> StoreResult<SqlValue> {
        match serde_json::to_value(key)? {
            Value::String(text) => Ok(SqlValue::Text(text)),
            Value::Number(number) => number.as_i64().map(SqlValue::Integer).ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "{}: key `{number}` does not fit a 64-bit integer",
                    self.mapping.collection()
                ))
            }),
            other => Err(StoreError::InvalidData(format!(
                "{}: unsupported key representation `{other}`",
                self.mapping.collection()
            ))),
        }
    }

    fn query_native(&mut self, clause: SqlClause, order: &str, query: &Query) -> StoreResult<Vec<E>> {
        let sql = format!(
            "SELECT {DOCUMENT_COLUMN} FROM {} WHERE {} ORDER BY {order} LIMIT ? OFFSET ?;",
            self.table(),
            clause.sql
        );
        debug!(
            "event=store_query module=store status=native collection={} sql={sql}",
            self.mapping.collection()
        );

        let mut bind_values = clause.params;
        bind_values.push(SqlValue::Integer(
            query.limit.map_or(-1, |limit| i64::try_from(limit).unwrap_or(i64::MAX)),
        ));
        bind_values.push(SqlValue::Integer(
            i64::try_from(query.offset).unwrap_or(i64::MAX),
        ));

        self.run(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(bind_values))?;
            let mut entities = Vec::new();
            while let Some(row) = rows.next()? {
                let document: String = row.get(0)?;
                entities.push(serde_json::from_str(&document)?);
            }
            Ok(entities)
        })
    }

    fn load_all(&mut self) -> StoreResult<Vec<(E::Key, Value)>> {
        let sql = format!(
            "SELECT {KEY_COLUMN}, {DOCUMENT_COLUMN} FROM {} ORDER BY {KEY_COLUMN} ASC;",
            self.table()
        );
        let collection = self.mapping.collection().to_string();

        self.run(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            let mut documents = Vec::new();
            while let Some(row) = rows.next()? {
                let key = parse_key::<E::Key>(row.get(0)?, &collection)?;
                let document: String = row.get(1)?;
                documents.push((key, serde_json::from_str(&document)?));
            }
            Ok(documents)
        })
    }
}

fn parse_key<K: EntityKey>(value: SqlValue, collection: &str) -> StoreResult<K> {
    let json = match value {
        SqlValue::Integer(number) => Value::from(number),
        SqlValue::Text(text) => Value::String(text),
        other => {
            return Err(StoreError::InvalidData(format!(
                "unsupported key value `{other:?}` in {collection}.{KEY_COLUMN}"
            )))
        }
    };

    serde_json::from_value(json).map_err(|err| {
        StoreError::InvalidData(format!("invalid key in {collection}.{KEY_COLUMN}: {err}"))
    })
}

impl<E: Entity> Store<E> for SqliteStore<E> {
    fn collection(&self) -> &str {
        self.mapping.collection()
    }

    fn insert(&mut self, entity: &mut E) -> StoreResult<()> {
        if entity.key().is_unassigned() {
            entity.set_key(E::Key::generate());
        }

        let key = self.key_to_sql(entity.key())?;
        let key_label = entity.key().to_string();
        let document = serde_json::to_string(&*entity)?;
        let collection = self.mapping.collection().to_string();
        let sql = format!(
            "INSERT INTO {} ({KEY_COLUMN}, {DOCUMENT_COLUMN}) VALUES (?1, ?2);",
            self.table()
        );

        self.run(|conn| match conn.execute(&sql, params![key, document]) {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict {
                    collection,
                    key: key_label,
                })
            }
            Err(err) => Err(err.into()),
        })
    }

    fn update(&mut self, entity: &E) -> StoreResult<()> {
        let key = self.key_to_sql(entity.key())?;
        let document = serde_json::to_string(entity)?;
        let sql = format!(
            "UPDATE {} SET {DOCUMENT_COLUMN} = ?1 WHERE {KEY_COLUMN} = ?2;",
            self.table()
        );

        let changed = self.run(|conn| Ok(conn.execute(&sql, params![document, key])?))?;
        if changed == 0 {
            return Err(StoreError::Missing {
                collection: self.mapping.collection().to_string(),
                key: entity.key().to_string(),
            });
        }
        Ok(())
    }

    fn delete(&mut self, key: &E::Key) -> StoreResult<()> {
        let key = self.key_to_sql(key)?;
        let sql = format!("DELETE FROM {} WHERE {KEY_COLUMN} = ?1;", self.table());
        self.run(|conn| {
            conn.execute(&sql, [key])?;
            Ok(())
        })
    }

    fn clear(&mut self) -> StoreResult<u64> {
        let sql = format!("DELETE FROM {};", self.table());
        let removed = self.run(|conn| Ok(conn.execute(&sql, [])?))?;
        debug!(
            "event=store_clear module=store status=ok collection={} removed={}",
            self.mapping.collection(),
            removed
        );
        Ok(removed as u64)
    }

    fn query(&mut self, query: &Query) -> StoreResult<Vec<E>> {
        let key_field = self.mapping.key_field().to_string();
        let clause = match &query.filter {
            Some(filter) => translate_filter(filter, &key_field),
            None => Some(SqlClause {
                sql: "1".to_string(),
                params: Vec::new(),
            }),
        };
        let order = translate_sort(query.sort.as_ref(), &key_field);

        if let (Some(clause), Some(order)) = (clause, order) {
            return self.query_native(clause, &order, query);
        }

        debug!(
            "event=store_query module=store status=in_process collection={}",
            self.mapping.collection()
        );
        run_in_process(self.load_all()?, query)
            .into_iter()
            .map(|(_, document)| Ok(serde_json::from_value(document)?))
            .collect()
    }

    fn count(&mut self, filter: Option<&Filter>) -> StoreResult<u64> {
        let clause = match filter {
            Some(filter) => translate_filter(filter, self.mapping.key_field()),
            None => Some(SqlClause {
                sql: "1".to_string(),
                params: Vec::new(),
            }),
        };

        let Some(clause) = clause else {
            let documents = self.load_all()?;
            return Ok(count_in_process(
                documents.iter().map(|(_, document)| document),
                filter,
            ));
        };

        let sql = format!("SELECT COUNT(*) FROM {} WHERE {};", self.table(), clause.sql);
        debug!(
            "event=store_count module=store status=native collection={} sql={sql}",
            self.mapping.collection()
        );
        let count: i64 = self.run(|conn| {
            Ok(conn.query_row(&sql, params_from_iter(clause.params), |row| row.get(0))?)
        })?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn get(&mut self, key: &E::Key) -> StoreResult<Option<E>> {
        let key = self.key_to_sql(key)?;
        let sql = format!(
            "SELECT {DOCUMENT_COLUMN} FROM {} WHERE {KEY_COLUMN} = ?1;",
            self.table()
        );

        let document: Option<String> = self.run(|conn| {
            Ok(conn
                .query_row(&sql, [key], |row| row.get(0))
                .optional()?)
        })?;
        document
            .map(|document| Ok(serde_json::from_str(&document)?))
            .transpose()
    }

    fn session(&self) -> Option<Arc<dyn BatchSession>> {
        if self.batched {
            let session: Arc<dyn BatchSession> = self.session.clone();
            Some(session)
        } else {
            None
        }
    }

    fn reset(&mut self) -> StoreResult<()> {
        self.prepared_generation = None;
        self.session.reset()
    }
}
