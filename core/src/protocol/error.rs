//! Error taxonomy for SeaDrop
//!
//! A single error type is used across the crate: an [`ErrorKind`] from the
//! fixed taxonomy plus a human-readable message and optional details.
//! Callers match on the kind; messages are for logs and UI only.

use std::fmt;

/// Error kind, grouped by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // General
    InvalidArgument,
    InvalidState,
    NotInitialized,
    AlreadyInitialized,
    NotSupported,
    Timeout,
    Cancelled,

    // Discovery / transport-adjacent
    DiscoveryNotAvailable,
    BluetoothOff,
    BluetoothNotSupported,
    BleAdvertiseFailed,
    BleScanFailed,

    // Connection
    ConnectionFailed,
    ConnectionLost,
    ConnectionRefused,
    ConnectionTimeout,
    WifiDirectNotAvailable,
    GroupFormationFailed,
    PeerNotFound,
    AlreadyConnected,
    NotConnected,

    // Transfer
    TransferFailed,
    TransferCancelled,
    TransferRejected,
    FileNotFound,
    FileReadError,
    FileWriteError,
    DiskFull,
    FileTooLarge,
    InvalidFileType,
    ChecksumMismatch,

    // Protocol framing
    ProtocolBadMagic,
    ProtocolVersionMismatch,
    ProtocolOverflow,
    DecodeTruncated,

    // Security
    EncryptionFailed,
    DecryptAuthFailure,
    AuthenticationFailed,
    KeyExchangeFailed,
    InvalidSignature,
    TrustDenied,
    DeviceNotTrusted,
    PairingFailed,
    PairingRejected,

    // Platform
    PlatformError,
    PermissionDenied,
    ServiceUnavailable,
    HardwareNotAvailable,
    DriverError,

    // Persistence
    DatabaseError,
    DatabaseCorrupted,
    DatabaseLocked,
    RecordNotFound,
}

impl ErrorKind {
    /// Stable name for logs and wire error codes.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::InvalidState => "invalid state",
            ErrorKind::NotInitialized => "not initialized",
            ErrorKind::AlreadyInitialized => "already initialized",
            ErrorKind::NotSupported => "not supported",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DiscoveryNotAvailable => "discovery not available",
            ErrorKind::BluetoothOff => "bluetooth off",
            ErrorKind::BluetoothNotSupported => "bluetooth not supported",
            ErrorKind::BleAdvertiseFailed => "ble advertise failed",
            ErrorKind::BleScanFailed => "ble scan failed",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::ConnectionLost => "connection lost",
            ErrorKind::ConnectionRefused => "connection refused",
            ErrorKind::ConnectionTimeout => "connection timeout",
            ErrorKind::WifiDirectNotAvailable => "wifi direct not available",
            ErrorKind::GroupFormationFailed => "group formation failed",
            ErrorKind::PeerNotFound => "peer not found",
            ErrorKind::AlreadyConnected => "already connected",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::TransferFailed => "transfer failed",
            ErrorKind::TransferCancelled => "transfer cancelled",
            ErrorKind::TransferRejected => "transfer rejected",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::FileReadError => "file read error",
            ErrorKind::FileWriteError => "file write error",
            ErrorKind::DiskFull => "disk full",
            ErrorKind::FileTooLarge => "file too large",
            ErrorKind::InvalidFileType => "invalid file type",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::ProtocolBadMagic => "bad protocol magic",
            ErrorKind::ProtocolVersionMismatch => "protocol version mismatch",
            ErrorKind::ProtocolOverflow => "payload too large",
            ErrorKind::DecodeTruncated => "truncated message",
            ErrorKind::EncryptionFailed => "encryption failed",
            ErrorKind::DecryptAuthFailure => "decryption failed",
            ErrorKind::AuthenticationFailed => "authentication failed",
            ErrorKind::KeyExchangeFailed => "key exchange failed",
            ErrorKind::InvalidSignature => "invalid signature",
            ErrorKind::TrustDenied => "trust denied",
            ErrorKind::DeviceNotTrusted => "device not trusted",
            ErrorKind::PairingFailed => "pairing failed",
            ErrorKind::PairingRejected => "pairing rejected",
            ErrorKind::PlatformError => "platform error",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::ServiceUnavailable => "service unavailable",
            ErrorKind::HardwareNotAvailable => "hardware not available",
            ErrorKind::DriverError => "driver error",
            ErrorKind::DatabaseError => "database error",
            ErrorKind::DatabaseCorrupted => "database corrupted",
            ErrorKind::DatabaseLocked => "database locked",
            ErrorKind::RecordNotFound => "record not found",
        }
    }

    /// Numeric code carried in wire `Error` messages.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::InvalidArgument => 2,
            ErrorKind::InvalidState => 3,
            ErrorKind::NotInitialized => 4,
            ErrorKind::AlreadyInitialized => 5,
            ErrorKind::NotSupported => 6,
            ErrorKind::Timeout => 7,
            ErrorKind::Cancelled => 8,
            ErrorKind::DiscoveryNotAvailable => 101,
            ErrorKind::BluetoothOff => 102,
            ErrorKind::BluetoothNotSupported => 103,
            ErrorKind::BleAdvertiseFailed => 104,
            ErrorKind::BleScanFailed => 105,
            ErrorKind::ConnectionFailed => 200,
            ErrorKind::ConnectionLost => 201,
            ErrorKind::ConnectionRefused => 202,
            ErrorKind::ConnectionTimeout => 203,
            ErrorKind::WifiDirectNotAvailable => 204,
            ErrorKind::GroupFormationFailed => 206,
            ErrorKind::PeerNotFound => 207,
            ErrorKind::AlreadyConnected => 208,
            ErrorKind::NotConnected => 209,
            ErrorKind::TransferFailed => 300,
            ErrorKind::TransferCancelled => 301,
            ErrorKind::TransferRejected => 302,
            ErrorKind::FileNotFound => 303,
            ErrorKind::FileReadError => 304,
            ErrorKind::FileWriteError => 305,
            ErrorKind::DiskFull => 306,
            ErrorKind::FileTooLarge => 307,
            ErrorKind::InvalidFileType => 308,
            ErrorKind::ChecksumMismatch => 309,
            ErrorKind::ProtocolBadMagic => 310,
            ErrorKind::ProtocolVersionMismatch => 311,
            ErrorKind::ProtocolOverflow => 312,
            ErrorKind::DecodeTruncated => 313,
            ErrorKind::EncryptionFailed => 401,
            ErrorKind::DecryptAuthFailure => 402,
            ErrorKind::AuthenticationFailed => 403,
            ErrorKind::KeyExchangeFailed => 404,
            ErrorKind::InvalidSignature => 405,
            ErrorKind::TrustDenied => 406,
            ErrorKind::DeviceNotTrusted => 407,
            ErrorKind::PairingFailed => 408,
            ErrorKind::PairingRejected => 409,
            ErrorKind::PlatformError => 500,
            ErrorKind::PermissionDenied => 501,
            ErrorKind::ServiceUnavailable => 502,
            ErrorKind::HardwareNotAvailable => 503,
            ErrorKind::DriverError => 504,
            ErrorKind::DatabaseError => 600,
            ErrorKind::DatabaseCorrupted => 601,
            ErrorKind::DatabaseLocked => 602,
            ErrorKind::RecordNotFound => 603,
        }
    }

    /// Look up a kind from its wire code. Unknown codes map to `PlatformError`.
    pub fn from_code(code: u32) -> ErrorKind {
        match code {
            2 => ErrorKind::InvalidArgument,
            3 => ErrorKind::InvalidState,
            4 => ErrorKind::NotInitialized,
            5 => ErrorKind::AlreadyInitialized,
            6 => ErrorKind::NotSupported,
            7 => ErrorKind::Timeout,
            8 => ErrorKind::Cancelled,
            101 => ErrorKind::DiscoveryNotAvailable,
            102 => ErrorKind::BluetoothOff,
            103 => ErrorKind::BluetoothNotSupported,
            104 => ErrorKind::BleAdvertiseFailed,
            105 => ErrorKind::BleScanFailed,
            200 => ErrorKind::ConnectionFailed,
            201 => ErrorKind::ConnectionLost,
            202 => ErrorKind::ConnectionRefused,
            203 => ErrorKind::ConnectionTimeout,
            204 => ErrorKind::WifiDirectNotAvailable,
            206 => ErrorKind::GroupFormationFailed,
            207 => ErrorKind::PeerNotFound,
            208 => ErrorKind::AlreadyConnected,
            209 => ErrorKind::NotConnected,
            300 => ErrorKind::TransferFailed,
            301 => ErrorKind::TransferCancelled,
            302 => ErrorKind::TransferRejected,
            303 => ErrorKind::FileNotFound,
            304 => ErrorKind::FileReadError,
            305 => ErrorKind::FileWriteError,
            306 => ErrorKind::DiskFull,
            307 => ErrorKind::FileTooLarge,
            308 => ErrorKind::InvalidFileType,
            309 => ErrorKind::ChecksumMismatch,
            310 => ErrorKind::ProtocolBadMagic,
            311 => ErrorKind::ProtocolVersionMismatch,
            312 => ErrorKind::ProtocolOverflow,
            313 => ErrorKind::DecodeTruncated,
            401 => ErrorKind::EncryptionFailed,
            402 => ErrorKind::DecryptAuthFailure,
            403 => ErrorKind::AuthenticationFailed,
            404 => ErrorKind::KeyExchangeFailed,
            405 => ErrorKind::InvalidSignature,
            406 => ErrorKind::TrustDenied,
            407 => ErrorKind::DeviceNotTrusted,
            408 => ErrorKind::PairingFailed,
            409 => ErrorKind::PairingRejected,
            500 => ErrorKind::PlatformError,
            501 => ErrorKind::PermissionDenied,
            502 => ErrorKind::ServiceUnavailable,
            503 => ErrorKind::HardwareNotAvailable,
            504 => ErrorKind::DriverError,
            600 => ErrorKind::DatabaseError,
            601 => ErrorKind::DatabaseCorrupted,
            602 => ErrorKind::DatabaseLocked,
            603 => ErrorKind::RecordNotFound,
            _ => ErrorKind::PlatformError,
        }
    }

    /// Whether the caller may retry the failed operation.
    pub fn is_recoverable(self) -> bool {
        !matches!(
            self,
            ErrorKind::NotSupported
                | ErrorKind::BluetoothNotSupported
                | ErrorKind::HardwareNotAvailable
                | ErrorKind::DatabaseCorrupted
        )
    }
}

/// Crate-wide error: a taxonomy kind plus message and optional details.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    details: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind.name())
        } else {
            write!(f, "{}: {}", self.kind.name(), self.message)?;
            if let Some(details) = &self.details {
                write!(f, " ({})", details)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        let kind = match e.kind() {
            IoKind::NotFound => ErrorKind::FileNotFound,
            IoKind::PermissionDenied => ErrorKind::PermissionDenied,
            IoKind::TimedOut => ErrorKind::Timeout,
            IoKind::ConnectionReset | IoKind::BrokenPipe | IoKind::UnexpectedEof => {
                ErrorKind::ConnectionLost
            }
            IoKind::ConnectionRefused => ErrorKind::ConnectionRefused,
            _ => ErrorKind::PlatformError,
        };
        Error::new(kind, e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        let kind = match &e {
            rusqlite::Error::QueryReturnedNoRows => ErrorKind::RecordNotFound,
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    ErrorKind::DatabaseLocked
                }
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    ErrorKind::DatabaseCorrupted
                }
                _ => ErrorKind::DatabaseError,
            },
            _ => ErrorKind::DatabaseError,
        };
        Error::new(kind, e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_message() {
        let err = Error::new(ErrorKind::FileNotFound, "no such file: a.txt");
        assert_eq!(err.to_string(), "file not found: no such file: a.txt");
    }

    #[test]
    fn test_display_with_details() {
        let err = Error::new(ErrorKind::DatabaseError, "insert failed")
            .with_details("devices table");
        assert_eq!(
            err.to_string(),
            "database error: insert failed (devices table)"
        );
    }

    #[test]
    fn test_code_round_trip() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::Timeout,
            ErrorKind::ConnectionLost,
            ErrorKind::TransferRejected,
            ErrorKind::ChecksumMismatch,
            ErrorKind::ProtocolBadMagic,
            ErrorKind::DecryptAuthFailure,
            ErrorKind::PairingFailed,
            ErrorKind::RecordNotFound,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::from_code(kind.code()), kind);
        }
    }

    #[test]
    fn test_unknown_code_maps_to_platform_error() {
        assert_eq!(ErrorKind::from_code(99_999), ErrorKind::PlatformError);
    }

    #[test]
    fn test_recoverable() {
        assert!(Error::new(ErrorKind::Timeout, "").is_recoverable());
        assert!(Error::new(ErrorKind::ConnectionLost, "").is_recoverable());
        assert!(!Error::new(ErrorKind::NotSupported, "").is_recoverable());
        assert!(!Error::new(ErrorKind::DatabaseCorrupted, "").is_recoverable());
        assert!(!Error::new(ErrorKind::HardwareNotAvailable, "").is_recoverable());
        assert!(!Error::new(ErrorKind::BluetoothNotSupported, "").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::ConnectionLost);
    }

    #[test]
    fn test_from_rusqlite_no_rows() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
    }

    #[test]
    fn test_error_trait_object() {
        let err: Box<dyn std::error::Error> =
            Box::new(Error::new(ErrorKind::InvalidState, "bad state"));
        assert!(!err.to_string().is_empty());
    }
}
