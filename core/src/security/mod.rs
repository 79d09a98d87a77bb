//! Cryptography for SeaDrop
//!
//! - `keys`: Ed25519 identity pairs, X25519 exchange pairs, device ids
//! - `aead`: XChaCha20-Poly1305 packet sealing
//! - `kdf`: key derivation, session keys, pairing PINs, verification codes
//! - `hashing`: BLAKE3 one-shot, keyed, streaming and file hashes
//!
//! Secret material lives in `ZeroizeOnDrop` buffers and is redacted from
//! all `Debug` output.

pub mod aead;
pub mod hashing;
pub mod kdf;
pub mod keys;

pub use aead::{
    decrypt, decrypt_with_nonce, encrypt, encrypt_with_nonce, random_nonce, KEY_SIZE, NONCE_SIZE,
    TAG_SIZE,
};
pub use hashing::{hash, hash_file, keyed_hash, HashStream, HASH_SIZE};
pub use kdf::{
    codes_match, derive_key, derive_session_key, derive_verification_code, generate_pairing_pin,
    random_bytes, random_uniform, secure_zero, security_init, SESSION_CONTEXT, VERIFY_CONTEXT,
};
pub use keys::{
    device_id_from_verify_key, key_agreement, verify_signature, ExchangeKeyPair, SigningKeyPair,
};
