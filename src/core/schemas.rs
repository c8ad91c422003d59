//! Database schema for the hive state store.
//!
//! Every entity is persisted as one JSON snapshot in `records`, keyed `<kind>/<name>`.

pub const HIVE_DB_NAME: &str = "hive.db";

pub const RECORDS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS records (
        key TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        body TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";
pub const RECORDS_SCHEMA_INDEX_KIND: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind)";

pub const RECORDS_UPSERT: &str = "
    INSERT INTO records (key, kind, body, updated_at) VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, body = excluded.body,
        updated_at = excluded.updated_at
";
pub const RECORDS_SELECT: &str = "SELECT key, kind, body, updated_at FROM records WHERE key = ?1";
pub const RECORDS_DELETE: &str = "DELETE FROM records WHERE key = ?1";
pub const RECORDS_KEYS_WITH_PREFIX: &str =
    "SELECT key FROM records WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key";
