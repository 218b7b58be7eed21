// Path: crates/cube/src/lib.rs
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

//! The Cube binary format.
//!
//! `codec`: the pure TLV wire grammar (bytes 6..1023 of a 1024-byte cube) —
//! tag/length encoding, field tiling, no semantic validation.
//!
//! `cube`: `Cube`, `CubeBuilder`, and `Cube::parse`, which layer the kind
//! derivation, signature placement, and integrity battery on top of the
//! codec.
//!
//! `hashcash`: the cooperative, cancellable proof-of-work miner.

pub mod codec;
pub mod cube;
pub mod hashcash;

pub use codec::{decode, encode, DecodedCube, EncodedCube, Field};
pub use cube::{Cube, CubeBuilder};
pub use hashcash::{CancelToken, HashcashError, HashcashMiner, MiningResult};
