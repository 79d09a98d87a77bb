//! Hashing (BLAKE3, 32-byte output)
//!
//! One-shot, keyed, streaming, and whole-file variants. File hashing
//! streams in 64 KiB blocks so memory use stays flat for large files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::protocol::error::{Error, ErrorKind, Result};

/// Hash output size in bytes.
pub const HASH_SIZE: usize = 32;

/// Block size for streaming file hashes.
const FILE_BLOCK_SIZE: usize = 64 * 1024;

/// One-shot hash.
pub fn hash(data: &[u8]) -> [u8; HASH_SIZE] {
    *blake3::hash(data).as_bytes()
}

/// Keyed hash with a 32-byte key.
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; HASH_SIZE] {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Incremental hash over data arriving in pieces.
#[derive(Debug)]
pub struct HashStream {
    hasher: blake3::Hasher,
}

impl Default for HashStream {
    fn default() -> Self {
        Self::new()
    }
}

impl HashStream {
    pub fn new() -> Self {
        HashStream {
            hasher: blake3::Hasher::new(),
        }
    }

    pub fn new_keyed(key: &[u8; 32]) -> Self {
        HashStream {
            hasher: blake3::Hasher::new_keyed(key),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> [u8; HASH_SIZE] {
        *self.hasher.finalize().as_bytes()
    }
}

/// Hash a file's contents, streaming in 64 KiB blocks.
pub fn hash_file(path: impl AsRef<Path>) -> Result<[u8; HASH_SIZE]> {
    let path = path.as_ref();
    let mut file = File::open(path).map_err(|e| {
        Error::new(
            ErrorKind::FileReadError,
            format!("cannot open {}: {}", path.display(), e),
        )
    })?;

    let mut stream = HashStream::new();
    let mut buf = vec![0u8; FILE_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| {
            Error::new(
                ErrorKind::FileReadError,
                format!("read failed on {}: {}", path.display(), e),
            )
        })?;
        if n == 0 {
            break;
        }
        stream.update(&buf[..n]);
    }
    Ok(stream.finalize())
}
