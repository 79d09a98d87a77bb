//! Core domain types for SeaDrop
//!
//! Identifiers, device records, trust levels, capabilities and clipboard
//! values. Timestamps stored in records are Unix seconds (`i64`), matching
//! the persistence layer.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in seconds.
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// =============================================================================
// Identifiers
// =============================================================================

/// Device identifier: 32-byte hash of the device's long-term verify key.
///
/// The all-zero value is the "unset" sentinel and never identifies a real
/// device. Ordering is byte-lexicographic; display form is lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub [u8; 32]);

impl DeviceId {
    pub const SIZE: usize = 32;

    /// The zero sentinel for "no device".
    pub fn unset() -> Self {
        DeviceId([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from lowercase or uppercase hex. Returns `None` on bad length
    /// or non-hex input.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
        let mut id = [0u8; 32];
        id.copy_from_slice(&bytes);
        Some(DeviceId(id))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Transfer identifier: 16 random bytes per request/response conversation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub [u8; 16]);

impl TransferId {
    pub const SIZE: usize = 16;

    /// Generate a fresh id from the cryptographic RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        TransferId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
        let mut id = [0u8; 16];
        id.copy_from_slice(&bytes);
        Some(TransferId(id))
    }
}

impl fmt::Debug for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransferId({})", self.to_hex())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =============================================================================
// Device metadata
// =============================================================================

/// Operating-system platform of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Platform {
    Unknown = 0,
    Linux = 1,
    Windows = 2,
    MacOs = 3,
    Android = 4,
    Ios = 5,
}

impl Platform {
    pub fn from_byte(b: u8) -> Platform {
        match b {
            1 => Platform::Linux,
            2 => Platform::Windows,
            3 => Platform::MacOs,
            4 => Platform::Android,
            5 => Platform::Ios,
            _ => Platform::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::Unknown => "Unknown",
            Platform::Linux => "Linux",
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Android => "Android",
            Platform::Ios => "iOS",
        }
    }
}

/// Device form factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FormFactor {
    Unknown = 0,
    Desktop = 1,
    Laptop = 2,
    Tablet = 3,
    Phone = 4,
    Tv = 5,
    Watch = 6,
}

impl FormFactor {
    pub fn from_byte(b: u8) -> FormFactor {
        match b {
            1 => FormFactor::Desktop,
            2 => FormFactor::Laptop,
            3 => FormFactor::Tablet,
            4 => FormFactor::Phone,
            5 => FormFactor::Tv,
            6 => FormFactor::Watch,
            _ => FormFactor::Unknown,
        }
    }
}

/// Capability bitmask advertised in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(pub u32);

impl Capabilities {
    pub const WIFI_DIRECT: u32 = 1;
    pub const BLUETOOTH: u32 = 2;
    pub const CLIPBOARD: u32 = 4;
    /// Reserved: resumable transfers are advertised but never negotiated.
    pub const RESUMABLE: u32 = 8;

    pub fn new(bits: u32) -> Self {
        Capabilities(bits)
    }

    pub fn wifi_direct(self) -> bool {
        self.0 & Self::WIFI_DIRECT != 0
    }

    pub fn bluetooth(self) -> bool {
        self.0 & Self::BLUETOOTH != 0
    }

    pub fn clipboard(self) -> bool {
        self.0 & Self::CLIPBOARD != 0
    }

    pub fn resumable(self) -> bool {
        self.0 & Self::RESUMABLE != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

// =============================================================================
// Trust
// =============================================================================

/// Trust level assigned to a device.
///
/// `Blocked` supersedes everything: a blocked device is never auto-accepted,
/// never auto-clipboarded, and never used for key agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    Unknown,
    Discovered,
    PairingPending,
    Trusted,
    Blocked,
}

impl TrustLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            TrustLevel::Unknown => "unknown",
            TrustLevel::Discovered => "discovered",
            TrustLevel::PairingPending => "pairing_pending",
            TrustLevel::Trusted => "trusted",
            TrustLevel::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<TrustLevel> {
        match s {
            "unknown" => Some(TrustLevel::Unknown),
            "discovered" => Some(TrustLevel::Discovered),
            "pairing_pending" => Some(TrustLevel::PairingPending),
            "trusted" => Some(TrustLevel::Trusted),
            "blocked" => Some(TrustLevel::Blocked),
            _ => None,
        }
    }
}

/// A known or discovered device record.
///
/// `paired_at` is set exactly when `Trusted` has ever been assigned.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub platform: Platform,
    pub form_factor: FormFactor,
    pub protocol_version: String,
    pub trust_level: TrustLevel,
    pub capabilities: Capabilities,
    pub first_seen: i64,
    pub last_seen: i64,
    pub paired_at: Option<i64>,
    pub user_alias: Option<String>,
}

impl Device {
    /// A freshly discovered device with no history.
    pub fn discovered(id: DeviceId, name: impl Into<String>) -> Self {
        let now = current_timestamp();
        Device {
            id,
            name: name.into(),
            platform: Platform::Unknown,
            form_factor: FormFactor::Unknown,
            protocol_version: String::new(),
            trust_level: TrustLevel::Discovered,
            capabilities: Capabilities::default(),
            first_seen: now,
            last_seen: now,
            paired_at: None,
            user_alias: None,
        }
    }

    pub fn is_trusted(&self) -> bool {
        self.trust_level == TrustLevel::Trusted
    }

    pub fn is_blocked(&self) -> bool {
        self.trust_level == TrustLevel::Blocked
    }

    /// User alias if set, otherwise the advertised device name.
    pub fn display_name(&self) -> &str {
        match &self.user_alias {
            Some(alias) if !alias.is_empty() => alias,
            _ => &self.name,
        }
    }
}

// =============================================================================
// Trust zones
// =============================================================================

/// Proximity zone derived from smoothed RSSI.
///
/// Ordered from closest to farthest; `Unknown` means no distance estimate
/// exists yet and is orthogonal to the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustZone {
    Intimate,
    Close,
    Nearby,
    Far,
    Unknown,
}

impl TrustZone {
    pub fn name(self) -> &'static str {
        match self {
            TrustZone::Intimate => "Intimate",
            TrustZone::Close => "Close",
            TrustZone::Nearby => "Nearby",
            TrustZone::Far => "Far",
            TrustZone::Unknown => "Unknown",
        }
    }

    /// Rank for closeness comparison. Lower is closer. `Unknown` has no rank.
    pub fn rank(self) -> Option<u8> {
        match self {
            TrustZone::Intimate => Some(0),
            TrustZone::Close => Some(1),
            TrustZone::Nearby => Some(2),
            TrustZone::Far => Some(3),
            TrustZone::Unknown => None,
        }
    }
}

// =============================================================================
// Clipboard
// =============================================================================

/// Kind of clipboard content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardKind {
    Text,
    Url,
    RichText,
    /// Image with pixel dimensions.
    Image {
        width: u32,
        height: u32,
    },
    /// An ordered list of path strings; the bytes carry no file contents.
    Files,
}

impl ClipboardKind {
    pub fn name(self) -> &'static str {
        match self {
            ClipboardKind::Text => "Text",
            ClipboardKind::Url => "Url",
            ClipboardKind::RichText => "RichText",
            ClipboardKind::Image { .. } => "Image",
            ClipboardKind::Files => "Files",
        }
    }
}

/// Maximum preview length in bytes for notifications.
pub const CLIPBOARD_PREVIEW_LEN: usize = 100;

/// A clipboard value ready to push or apply.
#[derive(Debug, Clone)]
pub struct ClipboardValue {
    pub kind: ClipboardKind,
    pub bytes: Vec<u8>,
    pub mime: String,
    pub captured_at: i64,
    /// First 100 text bytes, or `[Image WxH]` for images.
    pub preview: String,
}

fn text_preview(text: &str) -> String {
    // Truncate at a char boundary no further than the byte limit.
    let mut end = text.len().min(CLIPBOARD_PREVIEW_LEN);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

impl ClipboardValue {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        ClipboardValue {
            kind: ClipboardKind::Text,
            preview: text_preview(&text),
            bytes: text.into_bytes(),
            mime: "text/plain".to_string(),
            captured_at: current_timestamp(),
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        ClipboardValue {
            kind: ClipboardKind::Url,
            preview: text_preview(&url),
            bytes: url.into_bytes(),
            mime: "text/uri-list".to_string(),
            captured_at: current_timestamp(),
        }
    }

    pub fn from_rich_text(html: impl Into<String>) -> Self {
        let html = html.into();
        ClipboardValue {
            kind: ClipboardKind::RichText,
            preview: text_preview(&html),
            bytes: html.into_bytes(),
            mime: "text/html".to_string(),
            captured_at: current_timestamp(),
        }
    }

    pub fn from_image(png_bytes: Vec<u8>, width: u32, height: u32) -> Self {
        ClipboardValue {
            kind: ClipboardKind::Image { width, height },
            preview: format!("[Image {}x{}]", width, height),
            bytes: png_bytes,
            mime: "image/png".to_string(),
            captured_at: current_timestamp(),
        }
    }

    /// Paths are joined with newlines; no file contents are carried.
    pub fn from_files(paths: &[String]) -> Self {
        let joined = paths.join("\n");
        ClipboardValue {
            kind: ClipboardKind::Files,
            preview: text_preview(&joined),
            bytes: joined.into_bytes(),
            mime: "text/uri-list".to_string(),
            captured_at: current_timestamp(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Text content for text-like kinds; `None` for images.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            ClipboardKind::Image { .. } => None,
            _ => std::str::from_utf8(&self.bytes).ok(),
        }
    }

    /// File path list for `Files` values.
    pub fn file_paths(&self) -> Vec<String> {
        match self.kind {
            ClipboardKind::Files => self
                .as_text()
                .map(|t| t.lines().map(|l| l.to_string()).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Transfer direction
// =============================================================================

/// Direction of a transfer from the local device's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Send,
    Receive,
}

impl TransferDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferDirection::Send => "send",
            TransferDirection::Receive => "receive",
        }
    }

    pub fn from_str(s: &str) -> Option<TransferDirection> {
        match s {
            "send" => Some(TransferDirection::Send),
            "receive" => Some(TransferDirection::Receive),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_hex_round_trip() {
        let id = DeviceId([0xAB; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(DeviceId::from_hex(&hex), Some(id));
    }

    #[test]
    fn test_device_id_from_hex_rejects_bad_input() {
        assert_eq!(DeviceId::from_hex("abcd"), None);
        assert_eq!(DeviceId::from_hex(&"g".repeat(64)), None);
        assert_eq!(DeviceId::from_hex(&"a".repeat(63)), None);
        assert_eq!(DeviceId::from_hex(&"a".repeat(65)), None);
    }

    #[test]
    fn test_device_id_zero_sentinel() {
        assert!(DeviceId::unset().is_zero());
        assert!(!DeviceId([1; 32]).is_zero());
    }

    #[test]
    fn test_device_id_ordering_is_lexicographic() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        a[0] = 1;
        b[0] = 2;
        assert!(DeviceId(a) < DeviceId(b));

        let mut c = [0u8; 32];
        c[31] = 255;
        assert!(DeviceId(c) < DeviceId(a));
    }

    #[test]
    fn test_transfer_id_generate_unique() {
        let a = TransferId::generate();
        let b = TransferId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_hex().len(), 32);
    }

    #[test]
    fn test_transfer_id_hex_round_trip() {
        let id = TransferId::generate();
        assert_eq!(TransferId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(TransferId::from_hex("xyz"), None);
    }

    #[test]
    fn test_platform_round_trip() {
        for byte in 0..=6u8 {
            let platform = Platform::from_byte(byte);
            if byte <= 5 {
                assert_eq!(platform as u8, byte);
            } else {
                assert_eq!(platform, Platform::Unknown);
            }
        }
    }

    #[test]
    fn test_capabilities_bits() {
        let caps = Capabilities::new(
            Capabilities::WIFI_DIRECT | Capabilities::CLIPBOARD,
        );
        assert!(caps.wifi_direct());
        assert!(caps.clipboard());
        assert!(!caps.bluetooth());
        assert!(!caps.resumable());
    }

    #[test]
    fn test_trust_level_round_trip() {
        for level in [
            TrustLevel::Unknown,
            TrustLevel::Discovered,
            TrustLevel::PairingPending,
            TrustLevel::Trusted,
            TrustLevel::Blocked,
        ] {
            assert_eq!(TrustLevel::from_str(level.as_str()), Some(level));
        }
        assert_eq!(TrustLevel::from_str("bogus"), None);
    }

    #[test]
    fn test_device_display_name() {
        let mut device = Device::discovered(DeviceId([1; 32]), "Laptop");
        assert_eq!(device.display_name(), "Laptop");

        device.user_alias = Some("Work machine".to_string());
        assert_eq!(device.display_name(), "Work machine");

        device.user_alias = Some(String::new());
        assert_eq!(device.display_name(), "Laptop");
    }

    #[test]
    fn test_zone_rank_ordering() {
        assert!(TrustZone::Intimate.rank() < TrustZone::Close.rank());
        assert!(TrustZone::Close.rank() < TrustZone::Nearby.rank());
        assert!(TrustZone::Nearby.rank() < TrustZone::Far.rank());
        assert_eq!(TrustZone::Unknown.rank(), None);
    }

    #[test]
    fn test_clipboard_text_preview() {
        let long = "x".repeat(500);
        let value = ClipboardValue::from_text(long.clone());
        assert_eq!(value.preview.len(), CLIPBOARD_PREVIEW_LEN);
        assert_eq!(value.bytes.len(), 500);
        assert_eq!(value.as_text(), Some(long.as_str()));
    }

    #[test]
    fn test_clipboard_preview_respects_char_boundary() {
        // 50 two-byte chars = 100 bytes; adding one more crosses the limit
        let text = "é".repeat(51);
        let value = ClipboardValue::from_text(text);
        assert!(value.preview.len() <= CLIPBOARD_PREVIEW_LEN);
        assert!(value.preview.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_clipboard_image_preview() {
        let value = ClipboardValue::from_image(vec![0u8; 16], 800, 600);
        assert_eq!(value.preview, "[Image 800x600]");
        assert_eq!(
            value.kind,
            ClipboardKind::Image {
                width: 800,
                height: 600
            }
        );
        assert_eq!(value.as_text(), None);
    }

    #[test]
    fn test_clipboard_files_round_trip() {
        let paths = vec!["/tmp/a.txt".to_string(), "/tmp/b.png".to_string()];
        let value = ClipboardValue::from_files(&paths);
        assert_eq!(value.kind, ClipboardKind::Files);
        assert_eq!(value.file_paths(), paths);
    }

    #[test]
    fn test_transfer_direction_round_trip() {
        assert_eq!(
            TransferDirection::from_str("send"),
            Some(TransferDirection::Send)
        );
        assert_eq!(
            TransferDirection::from_str("receive"),
            Some(TransferDirection::Receive)
        );
        assert_eq!(TransferDirection::from_str("sideways"), None);
    }
}
