//! Database schema for the SeaDrop store
//!
//! Four tables: the local identity (one row), known devices, shared keys
//! for paired devices, and the transfer history.

use rusqlite::Connection;

/// Creates all required tables. Idempotent.
pub fn create_all_tables(conn: &Connection) -> rusqlite::Result<()> {
    create_identity_table(conn)?;
    create_devices_table(conn)?;
    create_device_keys_table(conn)?;
    create_history_table(conn)?;
    Ok(())
}

/// Local identity: this device's long-term Ed25519 signing key.
///
/// Only one row ever exists. The 64-byte blob is seed followed by the
/// verify key.
fn create_identity_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS local_identity (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            signing_key BLOB NOT NULL CHECK (length(signing_key) = 64),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;
    Ok(())
}

/// Known devices, keyed by lowercase-hex device id.
fn create_devices_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS devices (
            device_id TEXT PRIMARY KEY NOT NULL CHECK (length(device_id) = 64),
            name TEXT NOT NULL,
            platform INTEGER NOT NULL DEFAULT 0,
            form_factor INTEGER NOT NULL DEFAULT 0,
            protocol_version TEXT NOT NULL DEFAULT '',
            trust_level TEXT NOT NULL DEFAULT 'discovered',
            capabilities INTEGER NOT NULL DEFAULT 0,
            first_seen INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            paired_at INTEGER,
            user_alias TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_devices_trust ON devices(trust_level)",
        [],
    )?;
    Ok(())
}

/// Shared symmetric keys, populated only for trusted devices.
fn create_device_keys_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS device_keys (
            device_id TEXT PRIMARY KEY NOT NULL
                REFERENCES devices(device_id) ON DELETE CASCADE,
            shared_key BLOB NOT NULL CHECK (length(shared_key) = 32),
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        [],
    )?;
    Ok(())
}

/// Completed-transfer history.
fn create_history_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transfer_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transfer_id TEXT NOT NULL,
            peer_id TEXT NOT NULL,
            peer_name TEXT NOT NULL,
            direction TEXT NOT NULL,
            final_state TEXT NOT NULL,
            filenames_json TEXT NOT NULL DEFAULT '[]',
            total_bytes INTEGER NOT NULL DEFAULT 0,
            file_count INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            error_message TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_peer ON transfer_history(peer_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_time ON transfer_history(timestamp)",
        [],
    )?;
    Ok(())
}
