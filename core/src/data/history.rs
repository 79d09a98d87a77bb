//! Transfer history persistence
//!
//! Every terminal transfer lands one row here. Filenames are stored as a
//! JSON array so a variable-length list fits one column.

use rusqlite::{Connection, params};

use crate::protocol::error::Result;
use crate::protocol::types::{DeviceId, TransferDirection, TransferId};

/// One row of the transfer history.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Database row id; 0 until inserted.
    pub id: i64,
    pub transfer_id: TransferId,
    pub peer_id: DeviceId,
    /// Peer display name at the time of the transfer.
    pub peer_name: String,
    pub direction: TransferDirection,
    pub final_state: String,
    pub filenames: Vec<String>,
    pub total_bytes: u64,
    pub file_count: u32,
    pub duration_ms: u64,
    pub timestamp: i64,
    pub error_message: Option<String>,
}

/// Aggregate statistics over the history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub total_transfers: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Insert an entry; returns the new row id.
pub fn add_history(conn: &Connection, entry: &HistoryEntry) -> Result<i64> {
    let filenames_json = serde_json::to_string(&entry.filenames)
        .unwrap_or_else(|_| "[]".to_string());
    conn.execute(
        "INSERT INTO transfer_history
             (transfer_id, peer_id, peer_name, direction, final_state,
              filenames_json, total_bytes, file_count, duration_ms, timestamp,
              error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.transfer_id.to_hex(),
            entry.peer_id.to_hex(),
            entry.peer_name,
            entry.direction.as_str(),
            entry.final_state,
            filenames_json,
            entry.total_bytes as i64,
            entry.file_count,
            entry.duration_ms as i64,
            entry.timestamp,
            entry.error_message,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let transfer_hex: String = row.get(1)?;
    let peer_hex: String = row.get(2)?;
    let direction: String = row.get(4)?;
    let filenames_json: String = row.get(6)?;
    let total_bytes: i64 = row.get(7)?;
    let duration_ms: i64 = row.get(9)?;

    Ok(HistoryEntry {
        id: row.get(0)?,
        transfer_id: TransferId::from_hex(&transfer_hex).unwrap_or(TransferId([0; 16])),
        peer_id: DeviceId::from_hex(&peer_hex).unwrap_or(DeviceId::unset()),
        peer_name: row.get(3)?,
        direction: TransferDirection::from_str(&direction)
            .unwrap_or(TransferDirection::Send),
        final_state: row.get(5)?,
        filenames: serde_json::from_str(&filenames_json).unwrap_or_default(),
        total_bytes: total_bytes.max(0) as u64,
        file_count: row.get(8)?,
        duration_ms: duration_ms.max(0) as u64,
        timestamp: row.get(10)?,
        error_message: row.get(11)?,
    })
}

const HISTORY_COLUMNS: &str = "id, transfer_id, peer_id, peer_name, direction, final_state, \
     filenames_json, total_bytes, file_count, duration_ms, timestamp, error_message";

/// Newest-first page of the history.
pub fn get_history(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transfer_history ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
        HISTORY_COLUMNS
    ))?;
    let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_entry)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Newest-first history for one peer.
pub fn get_device_history(
    conn: &Connection,
    peer_id: &DeviceId,
    limit: usize,
) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transfer_history WHERE peer_id = ?1
         ORDER BY timestamp DESC, id DESC LIMIT ?2",
        HISTORY_COLUMNS
    ))?;
    let rows = stmt.query_map(params![peer_id.to_hex(), limit as i64], row_to_entry)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn delete_history_entry(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM transfer_history WHERE id = ?1", [id])?;
    Ok(())
}

pub fn clear_history(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM transfer_history", [])?;
    Ok(())
}

/// Delete entries older than the given Unix timestamp.
pub fn clear_history_before(conn: &Connection, before: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM transfer_history WHERE timestamp < ?1",
        [before],
    )?;
    Ok(())
}

/// Aggregate counters over the whole table.
pub fn transfer_stats(conn: &Connection) -> Result<TransferStats> {
    conn.query_row(
        "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN direction = 'send' THEN total_bytes END), 0),
                COALESCE(SUM(CASE WHEN direction = 'receive' THEN total_bytes END), 0),
                COALESCE(SUM(final_state = 'Completed'), 0),
                COALESCE(SUM(final_state = 'Failed'), 0)
         FROM transfer_history",
        [],
        |row| {
            let total: i64 = row.get(0)?;
            let sent: i64 = row.get(1)?;
            let received: i64 = row.get(2)?;
            let completed: i64 = row.get(3)?;
            let failed: i64 = row.get(4)?;
            Ok(TransferStats {
                total_transfers: total.max(0) as u64,
                total_bytes_sent: sent.max(0) as u64,
                total_bytes_received: received.max(0) as u64,
                completed: completed.max(0) as u64,
                failed: failed.max(0) as u64,
            })
        },
    )
    .map_err(Into::into)
}
