//! The trust store
//!
//! Process-wide catalogue of known devices, their trust levels and shared
//! keys, plus the transfer history. Every operation takes the single
//! exclusive lock around the SQLite connection; calls block briefly and
//! never invoke callbacks.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::Connection;

use super::{history, identity, start, trust};
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::types::{Device, DeviceId};
use crate::security::SigningKeyPair;

pub use super::history::{HistoryEntry, TransferStats};

/// Persistent `DeviceId -> (record, shared key)` map with a blocked set.
pub struct TrustStore {
    conn: Mutex<Connection>,
    /// None for in-memory stores; backup and size need the file path.
    db_path: Option<PathBuf>,
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl TrustStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<TrustStore> {
        let path = path.as_ref().to_path_buf();
        let conn = start::start_db(&path)?;
        Ok(TrustStore {
            conn: Mutex::new(conn),
            db_path: Some(path),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<TrustStore> {
        Ok(TrustStore {
            conn: Mutex::new(start::start_memory_db()?),
            db_path: None,
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::new(ErrorKind::DatabaseLocked, "store lock poisoned"))
    }

    // ---- identity ----

    /// Load the local identity, generating one on first run.
    pub fn get_or_create_identity(&self) -> Result<SigningKeyPair> {
        identity::get_or_create_identity(&*self.lock()?)
    }

    // ---- device records ----

    /// Upsert a record. Does not change its trust level.
    pub fn save(&self, device: &Device) -> Result<()> {
        trust::save_device(&*self.lock()?, device)
    }

    pub fn get(&self, id: &DeviceId) -> Result<Option<Device>> {
        trust::get_device(&*self.lock()?, id)
    }

    /// Promote to `Trusted`, store the shared key, stamp `paired_at`.
    pub fn trust(&self, id: &DeviceId, shared_key: &[u8; 32]) -> Result<()> {
        trust::trust_device(&*self.lock()?, id, shared_key)
    }

    /// Block the device and delete any stored shared key.
    pub fn block(&self, id: &DeviceId) -> Result<()> {
        trust::block_device(&*self.lock()?, id)
    }

    pub fn untrust(&self, id: &DeviceId) -> Result<()> {
        trust::untrust_device(&*self.lock()?, id)
    }

    pub fn unblock(&self, id: &DeviceId) -> Result<()> {
        trust::unblock_device(&*self.lock()?, id)
    }

    pub fn delete(&self, id: &DeviceId) -> Result<()> {
        trust::delete_device(&*self.lock()?, id)
    }

    pub fn set_user_alias(&self, id: &DeviceId, alias: Option<&str>) -> Result<()> {
        trust::set_user_alias(&*self.lock()?, id, alias)
    }

    pub fn is_trusted(&self, id: &DeviceId) -> Result<bool> {
        trust::is_trusted(&*self.lock()?, id)
    }

    pub fn is_blocked(&self, id: &DeviceId) -> Result<bool> {
        trust::is_blocked(&*self.lock()?, id)
    }

    pub fn get_shared_key(&self, id: &DeviceId) -> Result<[u8; 32]> {
        trust::get_shared_key(&*self.lock()?, id)
    }

    pub fn list_trusted(&self) -> Result<Vec<Device>> {
        trust::list_trusted(&*self.lock()?)
    }

    pub fn list_blocked(&self) -> Result<Vec<Device>> {
        trust::list_blocked(&*self.lock()?)
    }

    pub fn list_all(&self) -> Result<Vec<Device>> {
        trust::list_all(&*self.lock()?)
    }

    // ---- transfer history ----

    pub fn add_history(&self, entry: &HistoryEntry) -> Result<i64> {
        history::add_history(&*self.lock()?, entry)
    }

    pub fn get_history(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        history::get_history(&*self.lock()?, limit, offset)
    }

    pub fn get_device_history(&self, id: &DeviceId, limit: usize) -> Result<Vec<HistoryEntry>> {
        history::get_device_history(&*self.lock()?, id, limit)
    }

    pub fn delete_history_entry(&self, row_id: i64) -> Result<()> {
        history::delete_history_entry(&*self.lock()?, row_id)
    }

    pub fn clear_history(&self) -> Result<()> {
        history::clear_history(&*self.lock()?)
    }

    pub fn clear_history_before(&self, before: i64) -> Result<()> {
        history::clear_history_before(&*self.lock()?, before)
    }

    pub fn transfer_stats(&self) -> Result<TransferStats> {
        history::transfer_stats(&*self.lock()?)
    }

    // ---- maintenance ----

    pub fn integrity_check(&self) -> Result<bool> {
        start::integrity_check(&*self.lock()?)
    }

    pub fn vacuum(&self) -> Result<()> {
        start::vacuum(&*self.lock()?)
    }

    /// Byte-for-byte copy of the store file. Memory stores cannot back up.
    pub fn backup(&self, backup_path: &Path) -> Result<()> {
        let db_path = self.db_path.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::NotSupported, "in-memory store has no file to back up")
        })?;
        start::backup(&*self.lock()?, db_path, backup_path)
    }

    pub fn db_size(&self) -> u64 {
        self.db_path
            .as_ref()
            .map(|p| start::db_size(p))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::TrustLevel;

    #[test]
    fn test_store_trust_flow() {
        let store = TrustStore::open_in_memory().unwrap();
        let device = Device::discovered(DeviceId([1; 32]), "laptop");
        store.save(&device).unwrap();

        store.trust(&device.id, &[0x11; 32]).unwrap();
        assert!(store.is_trusted(&device.id).unwrap());
        assert_eq!(store.get_shared_key(&device.id).unwrap(), [0x11; 32]);

        store.block(&device.id).unwrap();
        assert!(store.is_blocked(&device.id).unwrap());
        assert_eq!(
            store.get_shared_key(&device.id).unwrap_err().kind(),
            ErrorKind::RecordNotFound
        );
    }

    #[test]
    fn test_store_identity_stable() {
        let store = TrustStore::open_in_memory().unwrap();
        let a = store.get_or_create_identity().unwrap();
        let b = store.get_or_create_identity().unwrap();
        assert_eq!(a.device_id(), b.device_id());
    }

    #[test]
    fn test_store_is_shareable_across_threads() {
        let store = std::sync::Arc::new(TrustStore::open_in_memory().unwrap());
        let mut handles = Vec::new();
        for seed in 0..4u8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let device =
                    Device::discovered(DeviceId([seed + 1; 32]), format!("dev-{}", seed));
                store.save(&device).unwrap();
                store.trust(&device.id, &[seed; 32]).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.list_trusted().unwrap().len(), 4);
    }

    #[test]
    fn test_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trust.db");

        let id = DeviceId([9; 32]);
        {
            let store = TrustStore::open(&path).unwrap();
            store.save(&Device::discovered(id, "phone")).unwrap();
            store.trust(&id, &[3; 32]).unwrap();
        }

        let store = TrustStore::open(&path).unwrap();
        let device = store.get(&id).unwrap().unwrap();
        assert_eq!(device.trust_level, TrustLevel::Trusted);
        assert_eq!(store.get_shared_key(&id).unwrap(), [3; 32]);
        assert!(store.integrity_check().unwrap());
        assert!(store.db_size() > 0);
    }

    #[test]
    fn test_memory_store_backup_not_supported() {
        let store = TrustStore::open_in_memory().unwrap();
        let err = store.backup(Path::new("/tmp/nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }
}
