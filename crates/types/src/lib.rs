// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # Verity Kernel Types
//!
//! This crate is the foundational library for the Verity kernel: the Cube
//! wire constants, the shared `CubeInfo`/`Relationship` records the store and
//! annotation engine exchange, error enums, and configuration structures.
//!
//! ## Architectural Role
//!
//! As the base crate, `verity-types` has minimal dependencies and is a
//! dependency for almost every other crate in the workspace. This prevents
//! circular dependencies and provides a single, canonical definition of the
//! shapes every layer of the kernel agrees on.

/// The fixed on-wire and on-disk size of a cube, in bytes.
pub const CUBE_SIZE: usize = 1024;
/// Size in bytes of a cube key (content hash or public key, depending on kind).
pub const KEY_SIZE: usize = 32;
/// Size in bytes of a public-key fingerprint (first 8 bytes of `hash(public_key)`).
pub const FINGERPRINT_SIZE: usize = 8;
/// Default proof-of-work difficulty: minimum required trailing zero bits.
pub const DEFAULT_DIFFICULTY: u32 = 12;
/// Upper bound on the number of hash entries a single `HASH_RESPONSE` may carry.
pub const MAX_CUBE_HASH_COUNT: usize = 1000;

/// Wire-format constants and enums: cube kinds, TLV field tags, message classes.
pub mod wire;
/// Per-key metadata shared by the store and annotation engine.
pub mod cube_info;
/// A unified set of all error types used across the kernel.
pub mod error;
/// Shared configuration structures (hashcash, store, sync, persistence).
pub mod config;
pub use cube_info::{CubeInfo, Relationship};
pub use wire::{CubeKind, FieldTag, MessageClass};
