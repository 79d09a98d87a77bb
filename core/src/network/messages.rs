//! Typed wire messages
//!
//! Encode/decode for every payload in the catalogue. Field order on the
//! wire is fixed; all encoders and decoders go through the codec in
//! [`crate::network::wire`].
//!
//! The per-file checksum in a transfer request is only present on the wire
//! when `include_checksum` is set; decoders must not consume those 32
//! bytes otherwise.

use crate::network::wire::{Reader, Writer};
use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::types::{
    Capabilities, ClipboardKind, ClipboardValue, DeviceId, Platform, TransferId,
};

/// Maximum number of files in one transfer request.
pub const MAX_FILES_PER_REQUEST: usize = 1000;

/// Maximum relative path length in bytes.
pub const MAX_PATH_LEN: usize = 4096;

/// Maximum basename length in bytes.
pub const MAX_FILENAME_LEN: usize = 255;

// =============================================================================
// Handshake
// =============================================================================

/// Hello / HelloAck payload.
///
/// The only plaintext message. Carries the long-term verify key, a fresh
/// ephemeral X25519 public key and a nonce, all bound together by an
/// Ed25519 signature so a peer cannot splice someone else's session key
/// into its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub device_id: DeviceId,
    pub device_name: String,
    pub platform: Platform,
    pub version: String,
    pub capabilities: Capabilities,
    pub verify_key: [u8; 32],
    pub eph_public: [u8; 32],
    pub nonce: [u8; 16],
    pub signature: [u8; 64],
}

impl HelloMessage {
    /// The byte string covered by the Hello signature.
    pub fn signed_bytes(verify_key: &[u8; 32], eph_public: &[u8; 32], nonce: &[u8; 16]) -> Vec<u8> {
        let mut out = Vec::with_capacity(80);
        out.extend_from_slice(verify_key);
        out.extend_from_slice(eph_public);
        out.extend_from_slice(nonce);
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(256);
        w.put_bytes(self.device_id.as_bytes());
        w.put_string(&self.device_name);
        w.put_u8(self.platform as u8);
        w.put_string(&self.version);
        w.put_u32(self.capabilities.bits());
        w.put_bytes(&self.verify_key);
        w.put_bytes(&self.eph_public);
        w.put_bytes(&self.nonce);
        w.put_bytes(&self.signature);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<HelloMessage> {
        let mut r = Reader::new(buf);
        Ok(HelloMessage {
            device_id: DeviceId(r.get_array::<32>()?),
            device_name: r.get_string()?,
            platform: Platform::from_byte(r.get_u8()?),
            version: r.get_string()?,
            capabilities: Capabilities::new(r.get_u32()?),
            verify_key: r.get_array::<32>()?,
            eph_public: r.get_array::<32>()?,
            nonce: r.get_array::<16>()?,
            signature: r.get_array::<64>()?,
        })
    }
}

// =============================================================================
// Transfer control
// =============================================================================

/// One file advertised in a transfer request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Forward-slash POSIX path relative to the transfer root.
    pub relative_path: String,
    pub size: u64,
    pub mime: String,
    /// Modification time, Unix seconds.
    pub modified_time: u64,
    /// Present iff the request has `include_checksum`.
    pub checksum: Option<[u8; 32]>,
}

impl FileEntry {
    /// Validate path constraints: non-empty, forward slashes only, no `..`
    /// segments, length limits on the path and its basename.
    pub fn validate(&self) -> Result<()> {
        let path = &self.relative_path;
        if path.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "empty file path"));
        }
        if path.len() > MAX_PATH_LEN {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("path exceeds {} bytes", MAX_PATH_LEN),
            ));
        }
        if path.contains('\\') || path.starts_with('/') {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("path must be relative with forward slashes: {}", path),
            ));
        }
        if path.split('/').any(|seg| seg == "..") {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("path traversal rejected: {}", path),
            ));
        }
        let basename = path.rsplit('/').next().unwrap_or(path);
        if basename.is_empty() || basename.len() > MAX_FILENAME_LEN {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("bad basename in path: {}", path),
            ));
        }
        Ok(())
    }

    pub fn basename(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// TransferRequest payload: the file list a sender proposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequestMessage {
    pub transfer_id: TransferId,
    pub total_size: u64,
    pub include_checksum: bool,
    pub files: Vec<FileEntry>,
}

impl TransferRequestMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64 + self.files.len() * 96);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_u64(self.total_size);
        w.put_bool(self.include_checksum);
        let count = self.files.len().min(MAX_FILES_PER_REQUEST);
        w.put_u32(count as u32);
        for file in &self.files[..count] {
            w.put_string(&file.relative_path);
            w.put_u64(file.size);
            w.put_string(&file.mime);
            if self.include_checksum {
                w.put_bytes(&file.checksum.unwrap_or([0u8; 32]));
            }
            w.put_u64(file.modified_time);
        }
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<TransferRequestMessage> {
        let mut r = Reader::new(buf);
        let transfer_id = TransferId(r.get_array::<16>()?);
        let total_size = r.get_u64()?;
        let include_checksum = r.get_bool()?;
        let count = r.get_u32()? as usize;
        if count > MAX_FILES_PER_REQUEST {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                format!("too many files in request: {}", count),
            ));
        }
        let mut files = Vec::with_capacity(count);
        for _ in 0..count {
            let relative_path = r.get_string()?;
            let size = r.get_u64()?;
            let mime = r.get_string()?;
            let checksum = if include_checksum {
                Some(r.get_array::<32>()?)
            } else {
                None
            };
            let modified_time = r.get_u64()?;
            files.push(FileEntry {
                relative_path,
                size,
                mime,
                modified_time,
                checksum,
            });
        }
        Ok(TransferRequestMessage {
            transfer_id,
            total_size,
            include_checksum,
            files,
        })
    }

    /// `sum(files.size)` must equal the advertised total.
    pub fn sizes_consistent(&self) -> bool {
        let sum: u64 = self.files.iter().map(|f| f.size).sum();
        sum == self.total_size
    }
}

/// TransferAccept payload. `save_directory` may be empty to use the
/// receiver's configured default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAcceptMessage {
    pub transfer_id: TransferId,
    pub save_directory: String,
}

impl TransferAcceptMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(32);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_string(&self.save_directory);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<TransferAcceptMessage> {
        let mut r = Reader::new(buf);
        Ok(TransferAcceptMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
            save_directory: r.get_string()?,
        })
    }
}

/// TransferReject payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRejectMessage {
    pub transfer_id: TransferId,
    pub reason: String,
}

impl TransferRejectMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(32);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_string(&self.reason);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<TransferRejectMessage> {
        let mut r = Reader::new(buf);
        Ok(TransferRejectMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
            reason: r.get_string()?,
        })
    }
}

/// Shared shape of TransferCancel / TransferPause / TransferResume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferControlMessage {
    pub transfer_id: TransferId,
}

impl TransferControlMessage {
    pub fn encode(&self) -> Vec<u8> {
        self.transfer_id.as_bytes().to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<TransferControlMessage> {
        let mut r = Reader::new(buf);
        Ok(TransferControlMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
        })
    }
}

// =============================================================================
// Data
// =============================================================================

/// FileHeader payload: announces one file before its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeaderMessage {
    pub transfer_id: TransferId,
    pub file_index: u32,
    pub filename: String,
    pub file_size: u64,
    pub total_chunks: u32,
    pub chunk_size: u32,
}

impl FileHeaderMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_u32(self.file_index);
        w.put_string(&self.filename);
        w.put_u64(self.file_size);
        w.put_u32(self.total_chunks);
        w.put_u32(self.chunk_size);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<FileHeaderMessage> {
        let mut r = Reader::new(buf);
        Ok(FileHeaderMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
            file_index: r.get_u32()?,
            filename: r.get_string()?,
            file_size: r.get_u64()?,
            total_chunks: r.get_u32()?,
            chunk_size: r.get_u32()?,
        })
    }
}

/// FileChunk payload: 28-byte chunk header followed by the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunkMessage {
    pub transfer_id: TransferId,
    pub file_index: u32,
    pub chunk_index: u32,
    /// Declared length; must equal the trailing data length.
    pub chunk_size: u32,
    pub data: Vec<u8>,
}

impl FileChunkMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(28 + self.data.len());
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_u32(self.file_index);
        w.put_u32(self.chunk_index);
        w.put_u32(self.chunk_size);
        w.put_bytes(&self.data);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<FileChunkMessage> {
        let mut r = Reader::new(buf);
        let transfer_id = TransferId(r.get_array::<16>()?);
        let file_index = r.get_u32()?;
        let chunk_index = r.get_u32()?;
        let chunk_size = r.get_u32()?;
        let data = r.rest().to_vec();
        Ok(FileChunkMessage {
            transfer_id,
            file_index,
            chunk_index,
            chunk_size,
            data,
        })
    }

    /// Declared size matches the payload that actually arrived.
    pub fn size_consistent(&self) -> bool {
        self.chunk_size as usize == self.data.len()
    }
}

/// FileComplete payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCompleteMessage {
    pub transfer_id: TransferId,
    pub file_index: u32,
}

impl FileCompleteMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(20);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_u32(self.file_index);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<FileCompleteMessage> {
        let mut r = Reader::new(buf);
        Ok(FileCompleteMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
            file_index: r.get_u32()?,
        })
    }
}

/// ChunkAck / ChunkNack payload (`success = false` for a nack).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAckMessage {
    pub transfer_id: TransferId,
    pub file_index: u32,
    pub chunk_index: u32,
    pub success: bool,
}

impl ChunkAckMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(25);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_u32(self.file_index);
        w.put_u32(self.chunk_index);
        w.put_bool(self.success);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<ChunkAckMessage> {
        let mut r = Reader::new(buf);
        Ok(ChunkAckMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
            file_index: r.get_u32()?,
            chunk_index: r.get_u32()?,
            success: r.get_bool()?,
        })
    }
}

// =============================================================================
// Status
// =============================================================================

/// Progress payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressMessage {
    pub transfer_id: TransferId,
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub files_done: u32,
    pub files_total: u32,
}

impl ProgressMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(40);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_u64(self.bytes_done);
        w.put_u64(self.bytes_total);
        w.put_u32(self.files_done);
        w.put_u32(self.files_total);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<ProgressMessage> {
        let mut r = Reader::new(buf);
        Ok(ProgressMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
            bytes_done: r.get_u64()?,
            bytes_total: r.get_u64()?,
            files_done: r.get_u32()?,
            files_total: r.get_u32()?,
        })
    }
}

/// Error payload. A fatal error fails the transfer it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub transfer_id: TransferId,
    pub code: u32,
    pub message: String,
    pub fatal: bool,
}

impl ErrorMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(48);
        w.put_bytes(self.transfer_id.as_bytes());
        w.put_u32(self.code);
        w.put_string(&self.message);
        w.put_bool(self.fatal);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<ErrorMessage> {
        let mut r = Reader::new(buf);
        Ok(ErrorMessage {
            transfer_id: TransferId(r.get_array::<16>()?),
            code: r.get_u32()?,
            message: r.get_string()?,
            fatal: r.get_bool()?,
        })
    }
}

// =============================================================================
// Clipboard
// =============================================================================

fn clipboard_kind_byte(kind: ClipboardKind) -> u8 {
    match kind {
        ClipboardKind::Text => 1,
        ClipboardKind::Url => 2,
        ClipboardKind::RichText => 3,
        ClipboardKind::Image { .. } => 4,
        ClipboardKind::Files => 5,
    }
}

/// ClipboardPush payload: type tag, image dimensions (zero unless image),
/// MIME, preview, then the raw bytes to the end of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardPushMessage {
    pub kind: ClipboardKind,
    pub mime: String,
    pub preview: String,
    pub data: Vec<u8>,
}

impl ClipboardPushMessage {
    pub fn from_value(value: &ClipboardValue) -> Self {
        ClipboardPushMessage {
            kind: value.kind,
            mime: value.mime.clone(),
            preview: value.preview.clone(),
            data: value.bytes.clone(),
        }
    }

    pub fn into_value(self) -> ClipboardValue {
        ClipboardValue {
            kind: self.kind,
            bytes: self.data,
            mime: self.mime,
            captured_at: crate::protocol::types::current_timestamp(),
            preview: self.preview,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (width, height) = match self.kind {
            ClipboardKind::Image { width, height } => (width, height),
            _ => (0, 0),
        };
        let mut w = Writer::with_capacity(32 + self.data.len());
        w.put_u8(clipboard_kind_byte(self.kind));
        w.put_u32(width);
        w.put_u32(height);
        w.put_string(&self.mime);
        w.put_string(&self.preview);
        w.put_bytes(&self.data);
        w.into_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<ClipboardPushMessage> {
        let mut r = Reader::new(buf);
        let tag = r.get_u8()?;
        let width = r.get_u32()?;
        let height = r.get_u32()?;
        let kind = match tag {
            1 => ClipboardKind::Text,
            2 => ClipboardKind::Url,
            3 => ClipboardKind::RichText,
            4 => ClipboardKind::Image { width, height },
            5 => ClipboardKind::Files,
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    format!("unknown clipboard type tag: {}", other),
                ))
            }
        };
        let mime = r.get_string()?;
        let preview = r.get_string()?;
        let data = r.rest().to_vec();
        Ok(ClipboardPushMessage {
            kind,
            mime,
            preview,
            data,
        })
    }
}

/// ClipboardAck payload: empty on success, a 4-byte error code otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipboardAckMessage {
    pub error_code: Option<u32>,
}

impl ClipboardAckMessage {
    pub fn ok() -> Self {
        ClipboardAckMessage { error_code: None }
    }

    pub fn failed(code: u32) -> Self {
        ClipboardAckMessage {
            error_code: Some(code),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self.error_code {
            None => Vec::new(),
            Some(code) => {
                let mut w = Writer::with_capacity(4);
                w.put_u32(code);
                w.into_bytes()
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<ClipboardAckMessage> {
        if buf.is_empty() {
            return Ok(ClipboardAckMessage::ok());
        }
        let mut r = Reader::new(buf);
        Ok(ClipboardAckMessage::failed(r.get_u32()?))
    }
}
