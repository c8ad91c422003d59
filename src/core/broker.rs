use crate::core::db;
use crate::core::error::PersistenceError;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Serializes every write to the state database and appends one audit event per write.
pub struct DbBroker {
    audit_log_path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub record_key: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join("broker.events.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        record_key: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, PersistenceError>
    where
        F: FnOnce(&Connection) -> Result<R, PersistenceError>,
    {
        let _lock = self
            .write_lock
            .lock()
            .map_err(|_| PersistenceError::Poisoned("broker"))?;

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(db_path)?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, record_key, op_name, &db_id, status)?;

        result
    }

    fn log_event(
        &self,
        actor: &str,
        record_key: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), PersistenceError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            record_key: record_key.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}

/// Reads the audit log, oldest first.
pub fn read_audit_log(path: &Path) -> Result<Vec<BrokerEvent>, PersistenceError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(PersistenceError::from))
        .collect()
}
