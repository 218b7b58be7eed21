// Path: crates/networking/src/lib.rs
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

//! `SyncPeer` and `SyncManager`: the gossip wire protocol (spec §4.7) and
//! the connection pool that drives it (spec §4.8).

pub mod manager;
pub mod peer;
pub mod wire;

pub use manager::{ManagerEvent, SyncManager};
pub use peer::{sample_without_replacement, PeerEvent, SyncPeer};
