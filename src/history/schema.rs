// src/history/schema.rs

//! Schema definitions and migrations for the revision store
//!
//! The store is an append-only log of full metadata snapshots. Each revision
//! row carries the commit message and content hash; each tracked file's
//! content is snapshotted in revision_files.

use crate::error::Result;
use rusqlite::Connection;
use tracing::debug;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current history schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        debug!("Applying history migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => panic!("Unknown migration version: {}", version),
    }
}

/// Initial schema - Version 1
///
/// - revisions: the ordered commit log (content hash, message, author, time)
/// - revision_files: full snapshot of each tracked file per revision
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE revisions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            hash TEXT NOT NULL UNIQUE,
            message TEXT NOT NULL,
            author TEXT NOT NULL,
            committed_at TEXT NOT NULL
        );

        CREATE INDEX idx_revisions_committed_at ON revisions(committed_at);

        CREATE TABLE revision_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            revision_hash TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content BLOB NOT NULL,
            sha256 TEXT NOT NULL,
            UNIQUE(revision_hash, file_name),
            FOREIGN KEY (revision_hash) REFERENCES revisions(hash) ON DELETE CASCADE
        );

        CREATE INDEX idx_revision_files_hash ON revision_files(revision_hash);
        ",
    )?;
    Ok(())
}
