//! Key derivation, pairing PINs and verification codes
//!
//! Derivation uses the BLAKE3 KDF with human-readable context strings for
//! domain separation. The same inputs always produce the same key; keys
//! derived under different contexts are cryptographically independent.

use rand::Rng;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::protocol::error::Result;
use crate::protocol::types::DeviceId;

/// Context string for per-connection session keys.
pub const SESSION_CONTEXT: &str = "SeaDrop-Session";

/// Context string for pairing verification codes.
pub const VERIFY_CONTEXT: &str = "SeaDrop-Verify";

/// Derive a 32-byte key from shared secret material.
///
/// `context` provides domain separation; `salt` is mixed into the keyed
/// material. Deterministic.
pub fn derive_key(shared_secret: &[u8], context: &str, salt: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(shared_secret);
    hasher.update(salt);
    *hasher.finalize().as_bytes()
}

/// Session key for one connection.
///
/// The salt is the two device ids concatenated in sorted order, so both
/// sides derive the same key regardless of who initiated.
pub fn derive_session_key(shared_secret: &[u8; 32], a: &DeviceId, b: &DeviceId) -> [u8; 32] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(lo.as_bytes());
    salt[32..].copy_from_slice(hi.as_bytes());
    let key = derive_key(shared_secret, SESSION_CONTEXT, &salt);
    salt.zeroize();
    key
}

/// Generate a 6-digit pairing PIN, uniform over `000000..=999999`.
pub fn generate_pairing_pin() -> String {
    let pin: u32 = rand::rngs::OsRng.gen_range(0..1_000_000);
    format!("{:06}", pin)
}

/// Derive the 6-digit verification code both sides display during pairing.
///
/// Equal on both ends iff the shared secrets match.
pub fn derive_verification_code(shared_secret: &[u8; 32]) -> String {
    let digest = derive_key(shared_secret, VERIFY_CONTEXT, &[]);
    let val = (u32::from(digest[0]) << 16) | (u32::from(digest[1]) << 8) | u32::from(digest[2]);
    format!("{:06}", val % 1_000_000)
}

/// Constant-time comparison of two displayed codes.
pub fn codes_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Fill a buffer with cryptographically secure random bytes.
pub fn random_bytes(buf: &mut [u8]) {
    use rand::RngCore;
    rand::rngs::OsRng.fill_bytes(buf);
}

/// A uniform random u32 below `upper_bound`.
pub fn random_uniform(upper_bound: u32) -> u32 {
    if upper_bound == 0 {
        return 0;
    }
    rand::rngs::OsRng.gen_range(0..upper_bound)
}

/// Zero a buffer holding secret material.
///
/// Call before releasing any buffer that carried key bytes or PINs.
pub fn secure_zero(buf: &mut [u8]) {
    buf.zeroize();
}

/// One-time security-subsystem check; exists for parity with platforms
/// where the crypto provider needs explicit initialization.
pub fn security_init() -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let secret = [0x42u8; 32];
        let k1 = derive_key(&secret, "test context", b"salt");
        let k2 = derive_key(&secret, "test context", b"salt");
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_derive_key_domain_separation() {
        let secret = [0x42u8; 32];
        let k1 = derive_key(&secret, "context a", b"");
        let k2 = derive_key(&secret, "context b", b"");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_derive_key_salt_changes_output() {
        let secret = [0x42u8; 32];
        let k1 = derive_key(&secret, "ctx", b"salt-1");
        let k2 = derive_key(&secret, "ctx", b"salt-2");
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_session_key_role_independent() {
        let secret = [9u8; 32];
        let a = DeviceId([1; 32]);
        let b = DeviceId([2; 32]);

        let k_ab = derive_session_key(&secret, &a, &b);
        let k_ba = derive_session_key(&secret, &b, &a);
        assert_eq!(k_ab, k_ba);
    }

    #[test]
    fn test_session_key_peer_dependent() {
        let secret = [9u8; 32];
        let a = DeviceId([1; 32]);
        let b = DeviceId([2; 32]);
        let c = DeviceId([3; 32]);

        assert_ne!(
            derive_session_key(&secret, &a, &b),
            derive_session_key(&secret, &a, &c)
        );
    }

    #[test]
    fn test_pin_shape() {
        for _ in 0..200 {
            let pin = generate_pairing_pin();
            assert_eq!(pin.len(), 6);
            assert!(pin.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_pin_distribution_rough_uniformity() {
        // First digit should span the full 0-9 range over enough samples.
        let mut seen = [false; 10];
        for _ in 0..2_000 {
            let pin = generate_pairing_pin();
            seen[(pin.as_bytes()[0] - b'0') as usize] = true;
        }
        assert!(seen.iter().all(|s| *s), "first digit never hit: {:?}", seen);
    }

    #[test]
    fn test_verification_code_deterministic() {
        let secret = [0x17u8; 32];
        let a = derive_verification_code(&secret);
        let b = derive_verification_code(&secret);
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
        assert!(a.bytes().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_verification_code_secret_dependent() {
        let a = derive_verification_code(&[1u8; 32]);
        let b = derive_verification_code(&[2u8; 32]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_codes_match() {
        assert!(codes_match("123456", "123456"));
        assert!(!codes_match("123456", "123457"));
        assert!(!codes_match("123456", "12345"));
    }

    #[test]
    fn test_random_uniform_bounds() {
        for _ in 0..100 {
            assert!(random_uniform(10) < 10);
        }
        assert_eq!(random_uniform(0), 0);
    }

    #[test]
    fn test_secure_zero() {
        let mut buf = vec![0xFFu8; 64];
        secure_zero(&mut buf);
        assert!(buf.iter().all(|b| *b == 0));
    }
}
