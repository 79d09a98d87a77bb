//! Identity and session key pairs
//!
//! Long-term identity is an Ed25519 signing pair; sessions use ephemeral
//! X25519 pairs. Secret halves are zeroed from memory on drop and never
//! appear in `Debug` output.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::protocol::error::{Error, ErrorKind, Result};
use crate::protocol::types::DeviceId;

/// Long-term Ed25519 signing pair.
///
/// The signing half is kept in the 64-byte `seed ∥ verify_key` layout so it
/// round-trips through persistent storage unchanged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningKeyPair {
    /// 64-byte signing key (seed followed by the verify key).
    signing: [u8; 64],
    /// 32-byte verify key (public, shared freely).
    #[zeroize(skip)]
    verify: [u8; 32],
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("signing", &"[REDACTED]")
            .field("verify", &hex::encode(self.verify))
            .finish()
    }
}

impl SigningKeyPair {
    /// Generate a fresh pair from the OS RNG.
    pub fn generate() -> Result<SigningKeyPair> {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();

        Ok(SigningKeyPair {
            signing: key.to_keypair_bytes(),
            verify: key.verifying_key().to_bytes(),
        })
    }

    /// Restore from the 64-byte stored form. Rejects inconsistent halves.
    pub fn from_bytes(bytes: &[u8; 64]) -> Result<SigningKeyPair> {
        let key = SigningKey::from_keypair_bytes(bytes).map_err(|_| {
            Error::new(ErrorKind::InvalidArgument, "inconsistent signing key bytes")
        })?;
        Ok(SigningKeyPair {
            signing: *bytes,
            verify: key.verifying_key().to_bytes(),
        })
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.signing
    }

    pub fn verify_key(&self) -> &[u8; 32] {
        &self.verify
    }

    /// Device id derived from the verify key.
    pub fn device_id(&self) -> DeviceId {
        device_id_from_verify_key(&self.verify)
    }

    /// Detached Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&self.signing[..32]);
        let key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        key.sign(message).to_bytes()
    }
}

/// Verify a detached signature against a verify key.
pub fn verify_signature(message: &[u8], signature: &[u8; 64], verify_key: &[u8; 32]) -> Result<()> {
    let key = VerifyingKey::from_bytes(verify_key)
        .map_err(|_| Error::new(ErrorKind::InvalidSignature, "malformed verify key"))?;
    let sig = Signature::from_bytes(signature);
    key.verify(message, &sig)
        .map_err(|_| Error::new(ErrorKind::InvalidSignature, "signature verification failed"))
}

/// The device id is the hash of the long-term verify key.
pub fn device_id_from_verify_key(verify_key: &[u8; 32]) -> DeviceId {
    DeviceId(*blake3::hash(verify_key).as_bytes())
}

/// Ephemeral X25519 exchange pair for one session.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ExchangeKeyPair {
    secret: [u8; 32],
    #[zeroize(skip)]
    public: [u8; 32],
}

impl fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("secret", &"[REDACTED]")
            .field("public", &hex::encode(self.public))
            .finish()
    }
}

impl ExchangeKeyPair {
    pub fn generate() -> Result<ExchangeKeyPair> {
        let secret = x25519_dalek::StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Ok(ExchangeKeyPair {
            secret: secret.to_bytes(),
            public: public.to_bytes(),
        })
    }

    pub fn from_secret(secret_bytes: &[u8; 32]) -> ExchangeKeyPair {
        let secret = x25519_dalek::StaticSecret::from(*secret_bytes);
        let public = x25519_dalek::PublicKey::from(&secret);
        ExchangeKeyPair {
            secret: secret.to_bytes(),
            public: public.to_bytes(),
        }
    }

    pub fn public(&self) -> &[u8; 32] {
        &self.public
    }

    pub fn secret(&self) -> &[u8; 32] {
        &self.secret
    }

    /// X25519 scalar multiplication with the peer's public key.
    ///
    /// Both sides obtain the same 32 bytes. Rejects the all-zero result a
    /// low-order peer point would produce.
    pub fn agree(&self, their_public: &[u8; 32]) -> Result<[u8; 32]> {
        key_agreement(&self.secret, their_public)
    }
}

/// X25519 key agreement between a local secret and a remote public key.
pub fn key_agreement(our_secret: &[u8; 32], their_public: &[u8; 32]) -> Result<[u8; 32]> {
    let secret = x25519_dalek::StaticSecret::from(*our_secret);
    let public = x25519_dalek::PublicKey::from(*their_public);
    let shared = secret.diffie_hellman(&public);
    let bytes = shared.to_bytes();
    if bytes.iter().all(|b| *b == 0) {
        return Err(Error::new(
            ErrorKind::KeyExchangeFailed,
            "key agreement produced a weak shared secret",
        ));
    }
    Ok(bytes)
}
