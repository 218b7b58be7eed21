// Path: crates/crypto/src/error.rs
//! Local error types for the `verity-crypto` crate.

// Re-export the canonical error type from the foundation crate.
pub use verity_types::error::CryptoError;
