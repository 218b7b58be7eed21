// Path: crates/crypto/src/lib.rs
//! # Verity Kernel Crypto Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free code. Panics are disallowed in non-test code to promote
//! robust error handling.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )
)]
//! # Verity Kernel Cryptography
//!
//! `CryptoCore`: SHA3-256 hashing, trailing-zero-bit counting, Ed25519
//! sign/verify, and fingerprint derivation. Pure functions, no I/O — the
//! cube integrity battery (§3.1 invariant 3-4) is built entirely on top of
//! this module.
//!
//! `key_store`: a versioned, passphrase-encrypted container for the node
//! operator's own signing key, used by `verity-node` when minting MUCs. The
//! core crates (`verity-cube`, `verity-store`) never read key material from
//! disk themselves.

pub mod core;
pub mod error;
pub mod key_store;

pub use core::{
    fingerprint, generate_keypair, hash, public_key_for, sign, trailing_zero_bits, verify,
};

#[cfg(test)]
mod tests {
    // Simple canary test to verify test discovery is working
    #[test]
    fn test_crypto_canary() {}
}
