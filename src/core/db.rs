use crate::core::broker::DbBroker;
use crate::core::error::PersistenceError;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub fn db_connect(db_path: &Path) -> Result<Connection, PersistenceError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    Ok(conn)
}

pub fn hive_db_path(root: &Path) -> PathBuf {
    root.join(schemas::HIVE_DB_NAME)
}

pub fn initialize_hive_db(root: &Path, broker: &DbBroker) -> Result<PathBuf, PersistenceError> {
    fs::create_dir_all(root)?;
    let db_path = hive_db_path(root);
    broker.with_conn(&db_path, "hivemined", None, "records.init", |conn| {
        conn.execute(schemas::RECORDS_SCHEMA, [])?;
        conn.execute(schemas::RECORDS_SCHEMA_INDEX_KIND, [])?;
        Ok(())
    })?;
    Ok(db_path)
}
