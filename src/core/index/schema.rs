// src/core/index/schema.rs

//! Idempotent schema creation and additive-only column migration (§4.4).
//!
//! Migration here follows the original reference implementation's
//! `PRAGMA table_info` + `ALTER TABLE ADD COLUMN` approach: it is driven by
//! column presence, not a schema version number, so an older database file
//! opened by a newer binary just gains the columns it's missing.

use rusqlite::Connection;

use crate::core::errors::IngestError;

const RUNS_COLUMNS: &[(&str, &str)] = &[
    ("run_id", "TEXT PRIMARY KEY"),
    ("status", "TEXT NOT NULL"),
    ("start_time", "INTEGER NOT NULL"),
    ("end_time", "INTEGER"),
    ("retention_days", "INTEGER"),
    ("local_run", "INTEGER NOT NULL DEFAULT 0"),
    ("dut", "TEXT"),
    ("run_name", "TEXT NOT NULL"),
    ("group_name", "TEXT"),
    ("group_hash", "TEXT"),
    ("abort_reason", "TEXT"),
    ("created_at", "INTEGER NOT NULL"),
    ("updated_at", "INTEGER NOT NULL"),
];

const TEST_CASES_COLUMNS: &[(&str, &str)] = &[
    ("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
    ("run_id", "TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE"),
    ("tc_full_name", "TEXT NOT NULL"),
    ("tc_id", "TEXT NOT NULL"),
    ("status", "TEXT NOT NULL"),
    ("start_time", "INTEGER NOT NULL"),
    ("end_time", "INTEGER"),
    ("symptom", "TEXT"),
    ("created_at", "INTEGER NOT NULL"),
    ("updated_at", "INTEGER NOT NULL"),
];

fn metadata_columns() -> &'static [(&'static str, &'static str)] {
    &[
        ("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        ("run_id", "TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE"),
        ("key", "TEXT NOT NULL"),
        ("value", "TEXT NOT NULL"),
        ("url", "TEXT"),
        ("created_at", "INTEGER NOT NULL"),
    ]
}

pub fn init(conn: &Connection) -> Result<(), IngestError> {
    create_table(conn, "runs", RUNS_COLUMNS)?;
    create_table(conn, "test_cases", TEST_CASES_COLUMNS)?;
    create_table(conn, "user_metadata", metadata_columns())?;
    create_table(conn, "group_metadata", metadata_columns())?;

    // Additive-only migration for columns introduced after a database file
    // was first created. Every column above already exists in a fresh
    // CREATE TABLE, so this only fires for genuinely new, nullable or
    // defaulted columns added in a later version: SQLite's ADD COLUMN
    // rejects NOT NULL without a default and REFERENCES entirely.
    migrate_columns(conn, "runs", RUNS_COLUMNS)?;
    migrate_columns(conn, "test_cases", TEST_CASES_COLUMNS)?;
    migrate_columns(conn, "user_metadata", metadata_columns())?;
    migrate_columns(conn, "group_metadata", metadata_columns())?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
         CREATE INDEX IF NOT EXISTS idx_runs_start_time ON runs(start_time);
         CREATE INDEX IF NOT EXISTS idx_runs_group_hash ON runs(group_hash);
         CREATE UNIQUE INDEX IF NOT EXISTS uq_test_cases_run_name ON test_cases(run_id, tc_full_name);
         CREATE INDEX IF NOT EXISTS idx_test_cases_run_id ON test_cases(run_id);
         CREATE INDEX IF NOT EXISTS idx_test_cases_status ON test_cases(status);
         CREATE UNIQUE INDEX IF NOT EXISTS uq_user_metadata_run_key ON user_metadata(run_id, key);
         CREATE INDEX IF NOT EXISTS idx_user_metadata_run_id ON user_metadata(run_id);
         CREATE INDEX IF NOT EXISTS idx_user_metadata_key ON user_metadata(key);
         CREATE UNIQUE INDEX IF NOT EXISTS uq_group_metadata_run_key ON group_metadata(run_id, key);
         CREATE INDEX IF NOT EXISTS idx_group_metadata_run_id ON group_metadata(run_id);
         CREATE INDEX IF NOT EXISTS idx_group_metadata_key ON group_metadata(key);",
    )?;

    Ok(())
}

fn create_table(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> Result<(), IngestError> {
    let cols = columns
        .iter()
        .map(|(name, ddl)| format!("{name} {ddl}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(&format!("CREATE TABLE IF NOT EXISTS {table} ({cols})"), [])?;
    Ok(())
}

fn migrate_columns(
    conn: &Connection,
    table: &str,
    expected: &[(&str, &str)],
) -> Result<(), IngestError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let existing: std::collections::HashSet<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for (name, ddl) in expected {
        if !existing.contains(*name) {
            conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {name} {ddl}"), [])?;
        }
    }
    Ok(())
}
