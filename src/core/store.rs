//! Persistence adapter for entity snapshots.
//!
//! Registries never talk to storage directly; they go through [`PersistenceAdapter`], which
//! stores one JSON record per entity under the key `<kind>/<name>`. [`SqliteStore`] is the
//! durable implementation used by the CLI, [`MemoryStore`] backs tests and dry runs.

use crate::core::broker::DbBroker;
use crate::core::db;
use crate::core::error::PersistenceError;
use crate::core::schemas;
use crate::core::time;
use rusqlite::{OptionalExtension, params};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    /// Kind tag stored next to the body, checked again on load.
    pub kind: String,
    pub body: JsonValue,
    pub updated_at: String,
}

impl Record {
    pub fn new(key: impl Into<String>, kind: impl Into<String>, body: JsonValue) -> Self {
        Self {
            key: key.into(),
            kind: kind.into(),
            body,
            updated_at: time::now_epoch_z(),
        }
    }
}

pub trait PersistenceAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Record>, PersistenceError>;
    fn put(&self, record: &Record) -> Result<(), PersistenceError>;
    /// Returns whether a record was removed.
    fn delete(&self, key: &str) -> Result<bool, PersistenceError>;
    /// Keys starting with `prefix`, sorted.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PersistenceError>;
}

/// SQLite-backed store rooted at a state directory.
pub struct SqliteStore {
    root: PathBuf,
    db_path: PathBuf,
    broker: DbBroker,
}

impl SqliteStore {
    pub fn open(root: &Path) -> Result<Self, PersistenceError> {
        let broker = DbBroker::new(root);
        let db_path = db::initialize_hive_db(root, &broker)?;
        Ok(Self {
            root: root.to_path_buf(),
            db_path,
            broker,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn audit_log_path(&self) -> &Path {
        self.broker.audit_log_path()
    }
}

impl PersistenceAdapter for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Record>, PersistenceError> {
        let conn = db::db_connect(&self.db_path)?;
        let row = conn
            .query_row(schemas::RECORDS_SELECT, params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .optional()?;
        match row {
            None => Ok(None),
            Some((key, kind, body, updated_at)) => Ok(Some(Record {
                key,
                kind,
                body: serde_json::from_str(&body)?,
                updated_at,
            })),
        }
    }

    fn put(&self, record: &Record) -> Result<(), PersistenceError> {
        let body = serde_json::to_string(&record.body)?;
        self.broker.with_conn(
            &self.db_path,
            "hivemined",
            Some(&record.key),
            "records.put",
            |conn| {
                conn.execute(
                    schemas::RECORDS_UPSERT,
                    params![record.key, record.kind, body, record.updated_at],
                )?;
                Ok(())
            },
        )
    }

    fn delete(&self, key: &str) -> Result<bool, PersistenceError> {
        self.broker
            .with_conn(&self.db_path, "hivemined", Some(key), "records.delete", |conn| {
                Ok(conn.execute(schemas::RECORDS_DELETE, params![key])? > 0)
            })
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        let conn = db::db_connect(&self.db_path)?;
        let mut stmt = conn.prepare(schemas::RECORDS_KEYS_WITH_PREFIX)?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

/// Process-local store. Writes can be switched off to simulate a failing backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Record>>,
    read_only: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_only(&self, read_only: bool) {
        if let Ok(mut flag) = self.read_only.lock() {
            *flag = read_only;
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        let read_only = *self
            .read_only
            .lock()
            .map_err(|_| PersistenceError::Poisoned("memory store"))?;
        if read_only {
            return Err(PersistenceError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "store is read-only",
            )));
        }
        Ok(())
    }

    fn records(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Record>>, PersistenceError> {
        self.records
            .lock()
            .map_err(|_| PersistenceError::Poisoned("memory store"))
    }
}

impl PersistenceAdapter for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Record>, PersistenceError> {
        Ok(self.records()?.get(key).cloned())
    }

    fn put(&self, record: &Record) -> Result<(), PersistenceError> {
        self.check_writable()?;
        self.records()?.insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, PersistenceError> {
        self.check_writable()?;
        Ok(self.records()?.remove(key).is_some())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        Ok(self
            .records()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
