// Path: crates/crypto/src/core.rs
//! `CryptoCore`: the pure cryptographic functions a cube's integrity battery
//! is built from. No I/O, no allocation beyond what the underlying
//! primitives require.

use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha3::{Digest, Sha3_256};

/// Hashes `bytes` with SHA3-256.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Counts the number of trailing zero bits in a digest, counted from the
/// last byte: a fully-zero trailing byte contributes 8, then the count
/// continues bit-by-bit into the first non-zero byte.
///
/// `trailing_zero_bits([..00]) == 8 * n` for `n` trailing zero bytes, and
/// `trailing_zero_bits([..01]) == 0`.
pub fn trailing_zero_bits(digest: &[u8; 32]) -> u32 {
    let mut count = 0u32;
    for &byte in digest.iter().rev() {
        if byte == 0 {
            count += 8;
            continue;
        }
        count += byte.trailing_zeros();
        break;
    }
    count
}

/// Signs `msg` with an Ed25519 signing key, returning the raw 64-byte signature.
pub fn sign(msg: &[u8], sk: &[u8; 32]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(sk);
    signing_key.sign(msg).to_bytes()
}

/// Verifies an Ed25519 signature over `msg` under public key `pk`.
///
/// Returns `false` on any malformed key/signature input rather than an
/// error: verification failure is always a normal, non-exceptional outcome
/// on the cube add-path (spec §7).
pub fn verify(msg: &[u8], sig: &[u8; 64], pk: &[u8; 32]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(pk) else {
        return false;
    };
    let signature = Signature::from_bytes(sig);
    verifying_key.verify(msg, &signature).is_ok()
}

/// Derives the 8-byte fingerprint of a public key: the first 8 bytes of
/// `hash(pk)`.
pub fn fingerprint(pk: &[u8; 32]) -> [u8; 8] {
    let digest = hash(pk);
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Generates a fresh Ed25519 key pair, returning `(public_key, secret_key)`.
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let mut csprng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    (
        signing_key.verifying_key().to_bytes(),
        signing_key.to_bytes(),
    )
}

/// Derives the Ed25519 public key corresponding to a secret key.
pub fn public_key_for(sk: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
    let signing_key = SigningKey::from_bytes(sk);
    Ok(signing_key.verifying_key().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctz_all_zero_bytes() {
        let digest = [0u8; 32];
        assert_eq!(trailing_zero_bits(&digest), 256);
    }

    #[test]
    fn ctz_one_trailing_zero_byte() {
        let mut digest = [0xFFu8; 32];
        digest[31] = 0;
        assert_eq!(trailing_zero_bits(&digest), 8);
    }

    #[test]
    fn ctz_last_byte_one() {
        let mut digest = [0u8; 32];
        digest[31] = 0x01;
        assert_eq!(trailing_zero_bits(&digest), 0);
    }

    #[test]
    fn ctz_last_byte_has_some_zero_bits() {
        let mut digest = [0u8; 32];
        digest[31] = 0b0000_1000; // 3 trailing zero bits
        assert_eq!(trailing_zero_bits(&digest), 3);
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let (pk, sk) = generate_keypair();
        let msg = b"hello cube";
        let sig = sign(msg, &sk);
        assert!(verify(msg, &sig, &pk));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let (pk, sk) = generate_keypair();
        let sig = sign(b"hello cube", &sk);
        assert!(!verify(b"hello CUBE", &sig, &pk));
    }

    #[test]
    fn verify_rejects_garbage_key() {
        let sig = [0u8; 64];
        let pk = [0u8; 32];
        assert!(!verify(b"anything", &sig, &pk));
    }

    #[test]
    fn fingerprint_is_hash_prefix() {
        let (pk, _) = generate_keypair();
        let fp = fingerprint(&pk);
        let full = hash(&pk);
        assert_eq!(&fp[..], &full[..8]);
    }

    #[test]
    fn public_key_for_matches_generated_pair() {
        let (pk, sk) = generate_keypair();
        assert_eq!(public_key_for(&sk).unwrap(), pk);
    }
}
