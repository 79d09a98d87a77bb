//! Device and trust persistence
//!
//! CRUD for the `devices` and `device_keys` tables. Shared keys exist only
//! for trusted devices: blocking or untrusting a device deletes its key in
//! the same statement batch, so a stale key can never be read back.

use rusqlite::{Connection, OptionalExtension, params};

use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::types::{
    Capabilities, Device, DeviceId, FormFactor, Platform, TrustLevel, current_timestamp,
};

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    let id_hex: String = row.get(0)?;
    let trust_str: String = row.get(5)?;
    let platform: i64 = row.get(2)?;
    let form_factor: i64 = row.get(3)?;
    let capabilities: i64 = row.get(6)?;

    Ok(Device {
        id: DeviceId::from_hex(&id_hex).unwrap_or(DeviceId::unset()),
        name: row.get(1)?,
        platform: Platform::from_byte(platform as u8),
        form_factor: FormFactor::from_byte(form_factor as u8),
        protocol_version: row.get(4)?,
        trust_level: TrustLevel::from_str(&trust_str).unwrap_or(TrustLevel::Unknown),
        capabilities: Capabilities::new(capabilities as u32),
        first_seen: row.get(7)?,
        last_seen: row.get(8)?,
        paired_at: row.get(9)?,
        user_alias: row.get(10)?,
    })
}

const DEVICE_COLUMNS: &str = "device_id, name, platform, form_factor, protocol_version, \
     trust_level, capabilities, first_seen, last_seen, paired_at, user_alias";

/// Upsert a device record. Never changes the stored trust level or
/// `paired_at` of an existing row.
pub fn save_device(conn: &Connection, device: &Device) -> Result<()> {
    conn.execute(
        "INSERT INTO devices (device_id, name, platform, form_factor, protocol_version,
                              trust_level, capabilities, first_seen, last_seen, paired_at,
                              user_alias)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(device_id) DO UPDATE SET
             name = excluded.name,
             platform = excluded.platform,
             form_factor = excluded.form_factor,
             protocol_version = excluded.protocol_version,
             capabilities = excluded.capabilities,
             last_seen = excluded.last_seen,
             user_alias = COALESCE(excluded.user_alias, devices.user_alias)",
        params![
            device.id.to_hex(),
            device.name,
            device.platform as u8,
            device.form_factor as u8,
            device.protocol_version,
            device.trust_level.as_str(),
            device.capabilities.bits(),
            device.first_seen,
            device.last_seen,
            device.paired_at,
            device.user_alias,
        ],
    )?;
    Ok(())
}

/// Fetch one device record.
pub fn get_device(conn: &Connection, id: &DeviceId) -> Result<Option<Device>> {
    conn.query_row(
        &format!("SELECT {} FROM devices WHERE device_id = ?1", DEVICE_COLUMNS),
        [id.to_hex()],
        row_to_device,
    )
    .optional()
    .map_err(Into::into)
}

/// Promote a device to `Trusted` and store its shared key.
///
/// The record must already exist; `paired_at` is stamped now.
pub fn trust_device(conn: &Connection, id: &DeviceId, shared_key: &[u8; 32]) -> Result<()> {
    let updated = conn.execute(
        "UPDATE devices SET trust_level = ?1, paired_at = ?2 WHERE device_id = ?3",
        params![
            TrustLevel::Trusted.as_str(),
            current_timestamp(),
            id.to_hex()
        ],
    )?;
    if updated == 0 {
        return Err(Error::new(
            ErrorKind::RecordNotFound,
            format!("cannot trust unknown device {}", id),
        ));
    }

    conn.execute(
        "INSERT INTO device_keys (device_id, shared_key) VALUES (?1, ?2)
         ON CONFLICT(device_id) DO UPDATE SET shared_key = excluded.shared_key",
        params![id.to_hex(), shared_key.as_slice()],
    )?;
    Ok(())
}

fn set_level_and_drop_key(conn: &Connection, id: &DeviceId, level: TrustLevel) -> Result<()> {
    let updated = conn.execute(
        "UPDATE devices SET trust_level = ?1 WHERE device_id = ?2",
        params![level.as_str(), id.to_hex()],
    )?;
    if updated == 0 {
        return Err(Error::new(
            ErrorKind::RecordNotFound,
            format!("unknown device {}", id),
        ));
    }
    conn.execute(
        "DELETE FROM device_keys WHERE device_id = ?1",
        [id.to_hex()],
    )?;
    Ok(())
}

/// Block a device. Deletes any stored shared key.
pub fn block_device(conn: &Connection, id: &DeviceId) -> Result<()> {
    set_level_and_drop_key(conn, id, TrustLevel::Blocked)
}

/// Demote a trusted device back to `Discovered`, deleting its key.
pub fn untrust_device(conn: &Connection, id: &DeviceId) -> Result<()> {
    set_level_and_drop_key(conn, id, TrustLevel::Discovered)
}

/// Lift a block, returning the device to `Discovered`. The shared key was
/// already deleted when the block was applied.
pub fn unblock_device(conn: &Connection, id: &DeviceId) -> Result<()> {
    set_level_and_drop_key(conn, id, TrustLevel::Discovered)
}

/// Remove the record and any key.
pub fn delete_device(conn: &Connection, id: &DeviceId) -> Result<()> {
    conn.execute("DELETE FROM devices WHERE device_id = ?1", [id.to_hex()])?;
    Ok(())
}

/// Set or clear the user-facing alias.
pub fn set_user_alias(conn: &Connection, id: &DeviceId, alias: Option<&str>) -> Result<()> {
    let updated = conn.execute(
        "UPDATE devices SET user_alias = ?1 WHERE device_id = ?2",
        params![alias, id.to_hex()],
    )?;
    if updated == 0 {
        return Err(Error::new(
            ErrorKind::RecordNotFound,
            format!("unknown device {}", id),
        ));
    }
    Ok(())
}

fn has_level(conn: &Connection, id: &DeviceId, level: TrustLevel) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM devices WHERE device_id = ?1 AND trust_level = ?2",
        params![id.to_hex(), level.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn is_trusted(conn: &Connection, id: &DeviceId) -> Result<bool> {
    has_level(conn, id, TrustLevel::Trusted)
}

pub fn is_blocked(conn: &Connection, id: &DeviceId) -> Result<bool> {
    has_level(conn, id, TrustLevel::Blocked)
}

/// The shared key for a trusted device. `RecordNotFound` when absent.
pub fn get_shared_key(conn: &Connection, id: &DeviceId) -> Result<[u8; 32]> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT shared_key FROM device_keys WHERE device_id = ?1",
            [id.to_hex()],
            |row| row.get(0),
        )
        .optional()?;

    let blob = blob.ok_or_else(|| {
        Error::new(
            ErrorKind::RecordNotFound,
            format!("no shared key for {}", id),
        )
    })?;
    blob.try_into().map_err(|_| {
        Error::new(ErrorKind::DatabaseCorrupted, "stored shared key is not 32 bytes")
    })
}

fn list_by_level(conn: &Connection, level: TrustLevel) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM devices WHERE trust_level = ?1",
        DEVICE_COLUMNS
    ))?;
    let rows = stmt.query_map([level.as_str()], row_to_device)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn list_trusted(conn: &Connection) -> Result<Vec<Device>> {
    list_by_level(conn, TrustLevel::Trusted)
}

pub fn list_blocked(conn: &Connection) -> Result<Vec<Device>> {
    list_by_level(conn, TrustLevel::Blocked)
}

pub fn list_all(conn: &Connection) -> Result<Vec<Device>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM devices", DEVICE_COLUMNS))?;
    let rows = stmt.query_map([], row_to_device)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
