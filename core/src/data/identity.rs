//! Local identity persistence
//!
//! The long-term signing key is generated on first run and stored in the
//! single-row `local_identity` table. Subsequent runs load the same pair,
//! so the device id stays stable across restarts.

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::info;

use crate::protocol::error::{Error, ErrorKind, Result};
use crate::security::SigningKeyPair;

/// Load the stored identity, creating one on first run.
pub fn get_or_create_identity(conn: &Connection) -> Result<SigningKeyPair> {
    if let Some(identity) = get_identity(conn)? {
        return Ok(identity);
    }

    let pair = SigningKeyPair::generate()?;
    match store_identity(conn, &pair) {
        Ok(()) => {
            info!(
                device_id = %pair.device_id(),
                "generated new local identity"
            );
        }
        // Another opener raced us to the single row; load theirs.
        Err(rusqlite::Error::SqliteFailure(ref e, _))
            if e.code == ErrorCode::ConstraintViolation => {}
        Err(e) => return Err(e.into()),
    }

    get_identity(conn)?.ok_or_else(|| {
        Error::new(
            ErrorKind::DatabaseError,
            "identity missing immediately after creation",
        )
    })
}

/// Load the stored identity, if any.
pub fn get_identity(conn: &Connection) -> Result<Option<SigningKeyPair>> {
    let row: Option<Vec<u8>> = conn
        .query_row(
            "SELECT signing_key FROM local_identity WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some(bytes) => {
            let bytes: [u8; 64] = bytes.try_into().map_err(|_| {
                Error::new(ErrorKind::DatabaseCorrupted, "stored signing key is not 64 bytes")
            })?;
            Ok(Some(SigningKeyPair::from_bytes(&bytes)?))
        }
    }
}

fn store_identity(conn: &Connection, pair: &SigningKeyPair) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO local_identity (id, signing_key) VALUES (1, ?1)",
        params![pair.to_bytes().as_slice()],
    )?;
    Ok(())
}
