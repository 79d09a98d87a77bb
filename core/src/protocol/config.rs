//! SeaDrop configuration

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::types::{Capabilities, Platform};
use crate::transfer::conflict::ConflictResolution;

/// Default chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default re-send budget per chunk after a nack.
pub const DEFAULT_CHUNK_RETRY_LIMIT: u32 = 3;

/// Default "small file" ceiling for auto-accept in the Nearby zone (10 MiB).
pub const DEFAULT_AUTO_ACCEPT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Abort a transfer after this many consecutive file failures.
pub const DEFAULT_CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Configuration for a SeaDrop instance.
#[derive(Debug, Clone)]
pub struct SeaDropConfig {
    /// User-visible name advertised in the handshake.
    pub device_name: String,
    /// Platform advertised in the handshake.
    pub platform: Platform,
    /// Application version string advertised in the handshake.
    pub version: String,
    /// Capability bits advertised in the handshake.
    pub capabilities: Capabilities,

    /// Path to the trust store database. `None` keeps it in memory.
    pub db_path: Option<PathBuf>,
    /// Directory received files land in.
    pub download_path: PathBuf,
    /// Nest received files in a per-sender subdirectory.
    pub use_sender_subdir: bool,

    /// How filename conflicts are resolved on the receiving side.
    pub conflict_resolution: ConflictResolution,
    /// Hash files before sending and verify after receiving.
    pub include_checksum: bool,
    /// Bytes per file chunk.
    pub chunk_size: usize,
    /// Re-sends allowed per chunk before the file fails.
    pub chunk_retry_limit: u32,
    /// Maximum files per transfer request.
    pub max_files_per_transfer: usize,
    /// Maximum total bytes per transfer; 0 means unbounded.
    pub max_transfer_bytes: u64,
    /// Consecutive file failures that abort a transfer.
    pub consecutive_failure_limit: u32,

    /// Auto-accept transfers from trusted peers when the zone permits.
    pub auto_accept_trusted: bool,
    /// Size ceiling for auto-accept when the peer is only Nearby.
    pub auto_accept_max_bytes: u64,
    /// Auto-apply pushed clipboards from trusted peers in the Intimate zone.
    pub auto_clipboard: bool,
    /// Received-clipboard history depth.
    pub clipboard_history_limit: usize,
    /// In-memory completed-transfer buffer depth.
    pub completed_history_limit: usize,

    /// Incoming transfer requests expire after this long.
    pub request_expiry: Duration,
    /// Pairing attempts expire after this long.
    pub pairing_timeout: Duration,
    /// Handshake must complete within this long.
    pub handshake_timeout: Duration,
    /// A sent chunk must be acked within this long.
    pub ack_timeout: Duration,
    /// A clipboard push must be acked within this long.
    pub clipboard_ack_timeout: Duration,

    /// Distance zone boundaries in meters: intimate, close, nearby.
    pub zone_thresholds_m: (f32, f32, f32),
    /// RSSI smoothing window in readings.
    pub smoothing_window: usize,
    /// Minimum interval between zone-change reports per device.
    pub zone_hysteresis: Duration,
}

impl Default for SeaDropConfig {
    fn default() -> Self {
        SeaDropConfig {
            device_name: "SeaDrop Device".to_string(),
            platform: Platform::Unknown,
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: Capabilities::new(
                Capabilities::WIFI_DIRECT | Capabilities::BLUETOOTH | Capabilities::CLIPBOARD,
            ),
            db_path: None,
            download_path: PathBuf::from("Downloads"),
            use_sender_subdir: true,
            conflict_resolution: ConflictResolution::AutoRename,
            include_checksum: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_retry_limit: DEFAULT_CHUNK_RETRY_LIMIT,
            max_files_per_transfer: 1000,
            max_transfer_bytes: 0,
            consecutive_failure_limit: DEFAULT_CONSECUTIVE_FAILURE_LIMIT,
            auto_accept_trusted: false,
            auto_accept_max_bytes: DEFAULT_AUTO_ACCEPT_MAX_BYTES,
            auto_clipboard: false,
            clipboard_history_limit: 50,
            completed_history_limit: 100,
            request_expiry: Duration::from_secs(60),
            pairing_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(30),
            clipboard_ack_timeout: Duration::from_secs(5),
            zone_thresholds_m: (3.0, 10.0, 30.0),
            smoothing_window: 5,
            zone_hysteresis: Duration::from_secs(2),
        }
    }
}

impl SeaDropConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.db_path = Some(path);
        self
    }

    pub fn with_download_path(mut self, path: PathBuf) -> Self {
        self.download_path = path;
        self
    }

    pub fn with_conflict_resolution(mut self, policy: ConflictResolution) -> Self {
        self.conflict_resolution = policy;
        self
    }

    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.include_checksum = enabled;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn with_chunk_retry_limit(mut self, retries: u32) -> Self {
        self.chunk_retry_limit = retries;
        self
    }

    pub fn with_max_transfer_bytes(mut self, bytes: u64) -> Self {
        self.max_transfer_bytes = bytes;
        self
    }

    pub fn with_auto_accept(mut self, enabled: bool) -> Self {
        self.auto_accept_trusted = enabled;
        self
    }

    pub fn with_auto_accept_max_bytes(mut self, bytes: u64) -> Self {
        self.auto_accept_max_bytes = bytes;
        self
    }

    pub fn with_auto_clipboard(mut self, enabled: bool) -> Self {
        self.auto_clipboard = enabled;
        self
    }

    pub fn with_request_expiry(mut self, expiry: Duration) -> Self {
        self.request_expiry = expiry;
        self
    }

    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    pub fn with_zone_thresholds(mut self, intimate: f32, close: f32, nearby: f32) -> Self {
        self.zone_thresholds_m = (intimate, close, nearby);
        self
    }

    pub fn with_zone_hysteresis(mut self, hysteresis: Duration) -> Self {
        self.zone_hysteresis = hysteresis;
        self
    }

    pub fn with_smoothing_window(mut self, samples: usize) -> Self {
        self.smoothing_window = samples;
        self
    }

    /// Small limits and short timeouts for tests; in-memory store.
    pub fn for_testing(download_path: PathBuf) -> Self {
        SeaDropConfig {
            device_name: "test-device".to_string(),
            db_path: None,
            download_path,
            chunk_size: 1024,
            request_expiry: Duration::from_secs(5),
            pairing_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            clipboard_ack_timeout: Duration::from_secs(2),
            zone_hysteresis: Duration::ZERO,
            smoothing_window: 1,
            ..SeaDropConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SeaDropConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.chunk_retry_limit, 3);
        assert_eq!(config.max_files_per_transfer, 1000);
        assert_eq!(config.max_transfer_bytes, 0);
        assert_eq!(config.auto_accept_max_bytes, 10 * 1024 * 1024);
        assert_eq!(config.request_expiry, Duration::from_secs(60));
        assert_eq!(config.pairing_timeout, Duration::from_secs(60));
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.clipboard_ack_timeout, Duration::from_secs(5));
        assert_eq!(config.clipboard_history_limit, 50);
        assert_eq!(config.zone_thresholds_m, (3.0, 10.0, 30.0));
        assert!(!config.auto_accept_trusted);
        assert!(!config.auto_clipboard);
    }

    #[test]
    fn test_builder_chain() {
        let config = SeaDropConfig::new()
            .with_device_name("workstation")
            .with_platform(Platform::Linux)
            .with_chunk_size(4096)
            .with_auto_accept(true)
            .with_auto_accept_max_bytes(1024)
            .with_zone_thresholds(1.0, 5.0, 20.0);

        assert_eq!(config.device_name, "workstation");
        assert_eq!(config.platform, Platform::Linux);
        assert_eq!(config.chunk_size, 4096);
        assert!(config.auto_accept_trusted);
        assert_eq!(config.auto_accept_max_bytes, 1024);
        assert_eq!(config.zone_thresholds_m, (1.0, 5.0, 20.0));
    }

    #[test]
    fn test_chunk_size_floor() {
        let config = SeaDropConfig::new().with_chunk_size(0);
        assert_eq!(config.chunk_size, 1);
    }

    #[test]
    fn test_testing_preset() {
        let config = SeaDropConfig::for_testing(PathBuf::from("/tmp/dl"));
        assert_eq!(config.download_path, PathBuf::from("/tmp/dl"));
        assert!(config.db_path.is_none());
        assert_eq!(config.smoothing_window, 1);
        assert_eq!(config.zone_hysteresis, Duration::ZERO);
    }
}
