// Path: crates/store/src/lib.rs
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

//! `CubeStore` and `AnnotationEngine`: the in-memory cube index, its MUC/IPC
//! contest resolver and IPC lifetime math, and the reverse-relationship
//! displayability engine built on top of it (spec §4.5-4.6).

pub mod annotation_engine;
pub mod cube_store;
pub mod lifetime;

pub use annotation_engine::AnnotationEngine;
pub use cube_store::{AddInput, CubeStore};
pub use lifetime::{contest_winner, cube_lifetime_secs, ipc_expiration};
