//! Authenticated encryption (XChaCha20-Poly1305)
//!
//! The default [`encrypt`] generates a fresh random 24-byte nonce per call
//! and prepends it: output is `nonce ∥ ciphertext ∥ tag`. The `_with_nonce`
//! variants leave nonce management to the caller, who is then responsible
//! for never reusing a nonce under the same key.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;

use crate::protocol::error::{Error, ErrorKind, Result};

/// Symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;

/// XChaCha20 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

fn cipher(key: &[u8; KEY_SIZE]) -> Result<XChaCha20Poly1305> {
    XChaCha20Poly1305::new_from_slice(key)
        .map_err(|_| Error::new(ErrorKind::EncryptionFailed, "invalid key length"))
}

/// Generate a fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt with a fresh random nonce. Output layout: `nonce ∥ ct ∥ tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE], aad: &[u8]) -> Result<Vec<u8>> {
    let nonce = random_nonce();
    let ct = encrypt_with_nonce(plaintext, key, &nonce, aad)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ct.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Decrypt the `nonce ∥ ct ∥ tag` layout produced by [`encrypt`].
///
/// Fails with `DecodeTruncated` on short input, `DecryptAuthFailure` when
/// the tag or AAD does not match.
pub fn decrypt(ciphertext: &[u8], key: &[u8; KEY_SIZE], aad: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::new(
            ErrorKind::DecodeTruncated,
            "ciphertext shorter than nonce and tag",
        ));
    }
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&ciphertext[..NONCE_SIZE]);
    decrypt_with_nonce(&ciphertext[NONCE_SIZE..], key, &nonce, aad)
}

/// Encrypt with a caller-supplied nonce. Output layout: `ct ∥ tag`.
pub fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>> {
    cipher(key)?
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::new(ErrorKind::EncryptionFailed, "aead encryption failed"))
}

/// Decrypt the `ct ∥ tag` layout produced by [`encrypt_with_nonce`].
pub fn decrypt_with_nonce(
    ciphertext: &[u8],
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::new(
            ErrorKind::DecodeTruncated,
            "ciphertext shorter than tag",
        ));
    }
    cipher(key)?
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| Error::new(ErrorKind::DecryptAuthFailure, "aead authentication failed"))
}
