// Path: crates/crypto/src/key_store.rs
//! Secure storage for the node operator's own Ed25519 signing key.
//!
//! Format V1:
//! [ Magic: "VTY-GKEY" (8) ]
//! [ Version: u16 (2) ]
//! [ KDF Algo: u8 (1) ]
//! [ KDF Mem KiB: u32 (4) ]
//! [ KDF Iters: u32 (4) ]
//! [ KDF Lanes: u8 (1) ]
//! [ Salt: 16B ]
//! [ AEAD Algo: u8 (1) ]
//! [ Nonce: 12B ]
//! [ Ciphertext + Tag: N + 16 ]
//!
//! This lives in `verity-crypto` rather than `verity-cube`/`verity-store`
//! because the core never touches key material on disk (spec §6.2): only
//! `verity-node`'s CLI reads and writes key files, through this module.

use crate::error::CryptoError;
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::{rngs::OsRng, RngCore};
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

// Header Constants
const HEADER_MAGIC: &[u8; 8] = b"VTY-GKEY";
const HEADER_VERSION: u16 = 1;
const HEADER_LEN: usize = 8 + 2 + 1 + 4 + 4 + 1 + 16 + 1 + 12; // 49 Bytes

// Parameter Defaults (Strong defaults for V1)
const KDF_ALGO_ARGON2ID: u8 = 1;
const KDF_MEM_KIB: u32 = 64 * 1024; // 64 MiB
const KDF_ITERS: u32 = 3;
const KDF_LANES: u8 = 4;
const SALT_LEN: usize = 16;
const AEAD_ALGO_CHACHA20POLY1305: u8 = 1;
const NONCE_LEN: usize = 12;
const KEK_LEN: usize = 32;

/// A container for sensitive data that zeroizes on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(pub Vec<u8>);

fn derive_kek(passphrase: &str, salt: &[u8]) -> Result<[u8; KEK_LEN], CryptoError> {
    let params = argon2::Params::new(KDF_MEM_KIB, KDF_ITERS, KDF_LANES as u32, Some(KEK_LEN))
        .map_err(|e| CryptoError::InvalidKey(format!("invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut kek = [0u8; KEK_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut kek)
        .map_err(|e| CryptoError::InvalidKey(format!("Argon2 derivation failed: {e}")))?;
    Ok(kek)
}

/// Encrypts raw key bytes using a passphrase, wrapping them in the V1 format.
pub fn encrypt_key(secret: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce_bytes);

    // Manually pack bytes to ensure a stable, endian-independent on-disk format.
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(HEADER_MAGIC);
    header.extend_from_slice(&HEADER_VERSION.to_be_bytes());
    header.push(KDF_ALGO_ARGON2ID);
    header.extend_from_slice(&KDF_MEM_KIB.to_be_bytes());
    header.extend_from_slice(&KDF_ITERS.to_be_bytes());
    header.push(KDF_LANES);
    header.extend_from_slice(&salt);
    header.push(AEAD_ALGO_CHACHA20POLY1305);
    header.extend_from_slice(&nonce_bytes);

    if header.len() != HEADER_LEN {
        return Err(CryptoError::InvalidKey("header size mismatch".into()));
    }

    let kek = derive_kek(passphrase, &salt)?;
    let cipher = ChaCha20Poly1305::new((&kek).into());
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, secret)
        .map_err(|e| CryptoError::InvalidKey(format!("encryption failed: {e}")))?;

    let mut output = header;
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypts a key file blob using a passphrase, respecting the versioned header.
pub fn decrypt_key(data: &[u8], passphrase: &str) -> Result<SensitiveBytes, CryptoError> {
    if data.len() < HEADER_LEN {
        return Err(CryptoError::InvalidKey("file too short".into()));
    }

    let Some(magic) = data.get(0..8) else {
        return Err(CryptoError::InvalidKey("file too short".into()));
    };
    if magic != HEADER_MAGIC {
        return Err(CryptoError::InvalidKey("invalid file signature".into()));
    }

    let version_bytes: [u8; 2] = data
        .get(8..10)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| CryptoError::InvalidKey("truncated header".into()))?;
    let version = u16::from_be_bytes(version_bytes);
    if version != 1 {
        return Err(CryptoError::InvalidKey(format!(
            "unsupported key format version: {version}"
        )));
    }

    let salt = data
        .get(20..36)
        .ok_or_else(|| CryptoError::InvalidKey("truncated header".into()))?;
    let nonce_bytes = data
        .get(37..49)
        .ok_or_else(|| CryptoError::InvalidKey("truncated header".into()))?;
    let ciphertext = data
        .get(HEADER_LEN..)
        .ok_or_else(|| CryptoError::InvalidKey("truncated body".into()))?;

    let kek = derive_kek(passphrase, salt)?;
    let cipher = ChaCha20Poly1305::new((&kek).into());
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::InvalidKey("decryption failed (wrong password or corrupted file)".into()))?;

    Ok(SensitiveBytes(plaintext))
}

/// Loads an Ed25519 secret key from disk, decrypting it into 32 raw bytes.
pub fn load_signing_key(path: &Path, passphrase: &str) -> Result<SensitiveBytes, CryptoError> {
    let encrypted_bytes = std::fs::read(path)
        .map_err(|e| CryptoError::InvalidKey(format!("failed to read key file: {e}")))?;
    decrypt_key(&encrypted_bytes, passphrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_v1() {
        let secret = b"my_secret_key_seed_32_bytes_long";
        let pass = "strong_password";

        let encrypted = encrypt_key(secret, pass).unwrap();

        assert_eq!(&encrypted[0..8], HEADER_MAGIC);
        assert_eq!(encrypted.len(), HEADER_LEN + secret.len() + 16);

        let decrypted = decrypt_key(&encrypted, pass).unwrap();
        assert_eq!(decrypted.0, secret);
    }

    #[test]
    fn test_wrong_password() {
        let secret = b"secret";
        let encrypted = encrypt_key(secret, "pass").unwrap();
        assert!(decrypt_key(&encrypted, "wrong").is_err());
    }

    #[test]
    fn test_tamper_header_salt() {
        // Modifying the salt (part of the header) causes KEK derivation to
        // yield a different key, which causes AEAD decryption to fail.
        let secret = b"secret";
        let mut encrypted = encrypt_key(secret, "pass").unwrap();
        encrypted[25] ^= 0xFF; // inside the salt range 20..36
        assert!(decrypt_key(&encrypted, "pass").is_err());
    }
}
