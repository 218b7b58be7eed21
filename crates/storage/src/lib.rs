// Path: crates/storage/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
        clippy::indexing_slicing
    )
)]

//! Pure-Rust persistent storage for the Verity node: a single redb-backed
//! Cubes DB keyed by a cube's 32-byte key, valued by its 1024-byte binary.

pub mod persistence;

pub use persistence::{PersistenceAdapter, SCHEMA_VERSION};
