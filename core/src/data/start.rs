//! Database startup and maintenance
//!
//! Opens the SQLite store, ensures the schema exists, and provides the
//! integrity / vacuum / backup operations. Schema creation is idempotent
//! (`CREATE TABLE IF NOT EXISTS`), so a partially initialized database
//! recovers cleanly on the next open.

use std::path::Path;

use rusqlite::Connection;

use super::schema::create_all_tables;
use crate::protocol::error::{Error, ErrorKind, Result};

/// Open (or create) the store at `path` and ensure all tables exist.
pub fn start_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path.as_ref())?;

    // WAL for concurrent readers; PRAGMA returns the new mode, so query it.
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    create_all_tables(&conn)?;
    Ok(conn)
}

/// In-memory database for tests. WAL does not apply to memory databases.
pub fn start_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_all_tables(&conn)?;
    Ok(conn)
}

/// Run `PRAGMA integrity_check`; true iff SQLite reports "ok".
pub fn integrity_check(conn: &Connection) -> Result<bool> {
    let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    Ok(verdict == "ok")
}

/// Reclaim free pages.
pub fn vacuum(conn: &Connection) -> Result<()> {
    conn.execute("VACUUM", [])?;
    Ok(())
}

/// Byte-for-byte copy of the store file.
///
/// `db_path` must be the path the connection was opened with; a WAL
/// checkpoint runs first so the copy is self-contained.
pub fn backup(conn: &Connection, db_path: &Path, backup_path: &Path) -> Result<()> {
    conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
    std::fs::copy(db_path, backup_path).map_err(|e| {
        Error::new(
            ErrorKind::FileWriteError,
            format!("backup to {} failed: {}", backup_path.display(), e),
        )
    })?;
    Ok(())
}

/// Size of the store file in bytes; 0 if it cannot be read.
pub fn db_size(db_path: &Path) -> u64 {
    std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0)
}
