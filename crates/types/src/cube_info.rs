// Path: crates/types/src/cube_info.rs
//! `CubeInfo`: the per-key metadata record shared by `CubeStore` and
//! `AnnotationEngine`.
//!
//! This merges what were historically two drifting shapes (a legacy dataset
//! type and an evolving info type) into one structure, per the kernel's
//! design notes: there is exactly one record per key, append-only with
//! respect to `reverse_relationships`, immutable in `binary` once set.

use crate::wire::CubeKind;
use std::collections::{BTreeMap, BTreeSet};

/// A (type, remote_key) edge extracted from a `RELATES_TO` field.
///
/// The core attaches no policy to a relationship type beyond storing forward
/// and reverse edges; policy (e.g. "a reply is displayable only if its
/// parent is") belongs to `AnnotationEngine` and is parameterized by type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relationship {
    /// The relationship type byte, as carried on the wire.
    pub rel_type: u8,
    /// The 32-byte key of the cube this relationship points to.
    pub remote_key: [u8; 32],
}

impl Relationship {
    /// Builds a relationship edge from its wire components.
    pub fn new(rel_type: u8, remote_key: [u8; 32]) -> Self {
        Self {
            rel_type,
            remote_key,
        }
    }
}

/// A per-key metadata record. `CubeStore` owns the map of these; the
/// `AnnotationEngine` only ever mutates `reverse_relationships`.
#[derive(Debug, Clone)]
pub struct CubeInfo {
    /// The 32-byte cube identifier: content hash for frozen/IPC, public key for MUC.
    pub key: [u8; 32],
    /// The full 1024-byte body, if known. `None` means "heard of but do not have".
    pub binary: Option<[u8; 1024]>,
    /// The cube's kind, once known from its header.
    pub kind: Option<CubeKind>,
    /// The minting timestamp parsed from the header, once the body is known.
    pub date: Option<u64>,
    /// The proof-of-work challenge level (trailing zero bits), once the body is known.
    pub challenge_level: Option<u32>,
    /// Edges `(type, other_key)` learned from other cubes that point at this key.
    pub reverse_relationships: BTreeSet<Relationship>,
    /// An opaque side-channel map for higher layers; never interpreted by the core.
    pub application_notes: BTreeMap<String, Vec<u8>>,
}

impl CubeInfo {
    /// Creates a placeholder record for a key the core has only heard of via
    /// a relationship edge pointing to it — `binary` is absent.
    pub fn placeholder(key: [u8; 32]) -> Self {
        Self {
            key,
            binary: None,
            kind: None,
            date: None,
            challenge_level: None,
            reverse_relationships: BTreeSet::new(),
            application_notes: BTreeMap::new(),
        }
    }

    /// A `CubeInfo` is complete iff its binary body is present.
    pub fn is_complete(&self) -> bool {
        self.binary.is_some()
    }

    /// Records a reverse edge `(type, source_key)` pointing at this record's
    /// key. Idempotent: re-inserting the same edge is a no-op.
    pub fn add_reverse_relationship(&mut self, rel_type: u8, source_key: [u8; 32]) -> bool {
        self.reverse_relationships
            .insert(Relationship::new(rel_type, source_key))
    }

    /// Returns the reverse relationships of the given type pointing at this key.
    ///
    /// Both the relationship type and the implicit "points at this record"
    /// condition must hold — a strict conjunction. An earlier generation of
    /// this logic filtered on type alone in some code paths, silently
    /// ignoring the remote-key clause; this implementation requires both.
    pub fn reverse_relationships_of_type(&self, rel_type: u8) -> Vec<&Relationship> {
        self.reverse_relationships
            .iter()
            .filter(|r| r.rel_type == rel_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_incomplete() {
        let info = CubeInfo::placeholder([1u8; 32]);
        assert!(!info.is_complete());
        assert!(info.reverse_relationships.is_empty());
    }

    #[test]
    fn reverse_relationship_insert_is_idempotent() {
        let mut info = CubeInfo::placeholder([0u8; 32]);
        assert!(info.add_reverse_relationship(2, [9u8; 32]));
        assert!(!info.add_reverse_relationship(2, [9u8; 32]));
        assert_eq!(info.reverse_relationships.len(), 1);
    }

    #[test]
    fn reverse_relationships_of_type_filters_strictly() {
        let mut info = CubeInfo::placeholder([0u8; 32]);
        info.add_reverse_relationship(2, [1u8; 32]);
        info.add_reverse_relationship(3, [2u8; 32]);
        info.add_reverse_relationship(2, [3u8; 32]);
        let replies = info.reverse_relationships_of_type(2);
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.rel_type == 2));
    }
}
