//! SQLite schema for the annotation store
//!
//! One table holds every fetched annotation, partitioned by
//! `(reader_app, book_id)` and keyed within a partition by identity key.

use rusqlite::{Connection, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let previous = if table_exists(conn, "schema_info")? {
        get_schema_version(conn)?
    } else {
        None
    };
    if previous == Some(1) {
        upgrade_from_v1(conn)?;
    }

    conn.execute_batch(
        r#"
        -- Schema version tracking
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Raw annotations as fetched from reader apps
        CREATE TABLE IF NOT EXISTS annotations (
            reader_app TEXT NOT NULL,
            book_id TEXT NOT NULL,
            identity_key TEXT NOT NULL,
            text TEXT NOT NULL,
            location_marker TEXT NOT NULL,
            note TEXT,
            style TEXT,
            -- Unix seconds plus the sub-second part, so nothing is rounded
            created_at INTEGER NOT NULL,
            created_nanos INTEGER NOT NULL DEFAULT 0,
            -- Unix milliseconds
            fetched_at INTEGER NOT NULL,
            -- Insertion order within the partition; kept on replacement
            seq INTEGER NOT NULL,
            PRIMARY KEY (reader_app, book_id, identity_key)
        );

        -- Rendering order within a book
        CREATE INDEX IF NOT EXISTS idx_annotations_order
            ON annotations(reader_app, book_id, created_at, created_nanos, seq);

        -- Latest fetch per book
        CREATE INDEX IF NOT EXISTS idx_annotations_fetched_at
            ON annotations(reader_app, book_id, fetched_at);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Version 1 kept `created_at` in milliseconds
fn upgrade_from_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        ALTER TABLE annotations ADD COLUMN created_nanos INTEGER NOT NULL DEFAULT 0;
        UPDATE annotations SET
            created_nanos = ((created_at % 1000) + 1000) % 1000 * 1000000,
            created_at = (created_at - ((created_at % 1000) + 1000) % 1000) / 1000;
        DROP INDEX IF EXISTS idx_annotations_order;
        "#,
    )
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    conn.prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?")?
        .exists([name])
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    if !table_exists(conn, "schema_info").unwrap_or(false) {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
