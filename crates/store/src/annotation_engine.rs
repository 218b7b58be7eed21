// Path: crates/store/src/annotation_engine.rs
//! `AnnotationEngine`: reverse-relationship indexing and displayability
//! propagation over the `CubeStore`'s shared `CubeInfo` map (§4.6).
//!
//! The engine never owns the map; it borrows the same `Arc<RwLock<_>>` the
//! store holds, the way the store's own contest resolver reaches into that
//! map directly rather than routing through a trait boundary — there is
//! exactly one writer of `CubeInfo` state in this process.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use verity_types::cube_info::CubeInfo;

const DISPLAYABLE_CHANNEL_CAPACITY: usize = 1024;

/// Reverse-indexes `RELATES_TO` edges and propagates displayability.
///
/// `policy_types` is the set of relationship-type bytes that gate
/// displayability and drive propagation; the engine itself attaches no
/// meaning to any particular byte value (spec §4.6 closing note).
pub struct AnnotationEngine {
    infos: Arc<RwLock<HashMap<[u8; 32], CubeInfo>>>,
    policy_types: BTreeSet<u8>,
    displayable_tx: broadcast::Sender<[u8; 32]>,
    /// Keys for which `cubeDisplayable` has already fired. Consulted so a
    /// MUC that was already displayable and stays displayable across a
    /// contest replacement doesn't re-emit and re-cascade (spec §5: at most
    /// once per non-displayable→displayable transition).
    announced: RwLock<HashSet<[u8; 32]>>,
}

impl AnnotationEngine {
    /// Builds an engine over a shared info map with the given gating types.
    pub fn new(infos: Arc<RwLock<HashMap<[u8; 32], CubeInfo>>>, policy_types: BTreeSet<u8>) -> Self {
        let (displayable_tx, _) = broadcast::channel(DISPLAYABLE_CHANNEL_CAPACITY);
        Self {
            infos,
            policy_types,
            displayable_tx,
            announced: RwLock::new(HashSet::new()),
        }
    }

    /// Subscribes to `cubeDisplayable` events.
    pub fn subscribe_displayable(&self) -> broadcast::Receiver<[u8; 32]> {
        self.displayable_tx.subscribe()
    }

    /// Runs both engine responsibilities for a newly added cube `key`:
    /// reverse-indexing its forward `RELATES_TO` edges, then propagating
    /// displayability from `key` outward through reverse policy edges.
    pub fn on_cube_added(&self, key: [u8; 32], forward_relationships: &[(u8, [u8; 32])]) {
        self.index_relationships(key, forward_relationships);
        self.propagate_from(key);
    }

    /// For each `(type, remote_key)` edge the cube at `key` declares, ensures
    /// a placeholder `CubeInfo(remote_key)` exists and records the reverse
    /// edge `(type, key)` on it. Idempotent.
    fn index_relationships(&self, key: [u8; 32], forward_relationships: &[(u8, [u8; 32])]) {
        if forward_relationships.is_empty() {
            return;
        }
        let mut infos = self.infos.write().unwrap_or_else(|e| e.into_inner());
        for (rel_type, remote_key) in forward_relationships {
            infos
                .entry(*remote_key)
                .or_insert_with(|| CubeInfo::placeholder(*remote_key))
                .add_reverse_relationship(*rel_type, key);
        }
    }

    /// A cube is displayable iff it is complete and, for each of its own
    /// `RELATES_TO` edges whose type is a policy type, the remote cube
    /// exists, is complete, and is itself displayable.
    ///
    /// Pure predicate; nothing about the result is cached. A cycle in the
    /// policy-edge graph (A depends on B depends on A) is treated as "not
    /// displayable" rather than looping forever.
    pub fn is_displayable(&self, key: &[u8; 32]) -> bool {
        let mut visited = HashSet::new();
        self.is_displayable_inner(key, &mut visited)
    }

    fn is_displayable_inner(&self, key: &[u8; 32], visited: &mut HashSet<[u8; 32]>) -> bool {
        if !visited.insert(*key) {
            return false;
        }
        let infos = self.infos.read().unwrap_or_else(|e| e.into_inner());
        let Some(info) = infos.get(key) else {
            return false;
        };
        let Some(binary) = info.binary.as_ref() else {
            return false;
        };
        let Ok(forward) = verity_cube::codec::decode(binary.as_slice()) else {
            return false;
        };
        let gated_targets: Vec<[u8; 32]> = forward
            .fields
            .into_iter()
            .filter_map(|(field, _, _)| match field {
                verity_cube::codec::Field::RelatesTo {
                    rel_type,
                    remote_key,
                } if self.policy_types.contains(&rel_type) => Some(remote_key),
                _ => None,
            })
            .collect();
        drop(infos);

        for remote_key in gated_targets {
            if !self.is_displayable_inner(&remote_key, visited) {
                return false;
            }
        }
        true
    }

    /// Re-evaluates displayability starting at `key`, emitting
    /// `cubeDisplayable` for it and any ancestor newly unblocked by it,
    /// walking reverse policy-type edges. Visited-set bounded.
    fn propagate_from(&self, key: [u8; 32]) {
        let mut visited = HashSet::new();
        self.propagate_recursive(key, &mut visited);
    }

    fn propagate_recursive(&self, key: [u8; 32], visited: &mut HashSet<[u8; 32]>) {
        if !visited.insert(key) {
            return;
        }
        if !self.is_displayable(&key) {
            return;
        }
        let newly_announced = self
            .announced
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key);
        if !newly_announced {
            return;
        }
        let _ = self.displayable_tx.send(key);

        let next: Vec<[u8; 32]> = {
            let infos = self.infos.read().unwrap_or_else(|e| e.into_inner());
            let Some(info) = infos.get(&key) else {
                return;
            };
            self.policy_types
                .iter()
                .flat_map(|t| info.reverse_relationships_of_type(*t))
                .map(|r| r.remote_key)
                .collect()
        };
        for remote_key in next {
            self.propagate_recursive(remote_key, visited);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(policy_types: &[u8]) -> AnnotationEngine {
        AnnotationEngine::new(
            Arc::new(RwLock::new(HashMap::new())),
            policy_types.iter().copied().collect(),
        )
    }

    fn insert_complete(engine: &AnnotationEngine, key: [u8; 32], binary: [u8; 1024]) {
        let mut infos = engine.infos.write().unwrap();
        let info = infos.entry(key).or_insert_with(|| CubeInfo::placeholder(key));
        info.binary = Some(binary);
    }

    #[test]
    fn incomplete_cube_is_not_displayable() {
        let engine = engine_with(&[2]);
        let key = [1u8; 32];
        assert!(!engine.is_displayable(&key));
    }

    #[test]
    fn index_relationships_creates_placeholder_and_reverse_edge() {
        let engine = engine_with(&[2]);
        let source = [1u8; 32];
        let remote = [2u8; 32];
        engine.index_relationships(source, &[(2, remote)]);

        #[allow(clippy::unwrap_used)]
        let infos = engine.infos.read().unwrap();
        let remote_info = infos.get(&remote).expect("placeholder created");
        assert!(!remote_info.is_complete());
        assert_eq!(remote_info.reverse_relationships_of_type(2).len(), 1);
    }

    #[test]
    fn index_relationships_is_idempotent() {
        let engine = engine_with(&[2]);
        let source = [1u8; 32];
        let remote = [2u8; 32];
        engine.index_relationships(source, &[(2, remote)]);
        engine.index_relationships(source, &[(2, remote)]);

        #[allow(clippy::unwrap_used)]
        let infos = engine.infos.read().unwrap();
        let remote_info = infos.get(&remote).unwrap();
        assert_eq!(remote_info.reverse_relationships_of_type(2).len(), 1);
    }

    #[test]
    fn complete_cube_with_no_policy_edges_is_displayable() {
        let engine = engine_with(&[2]);
        let key = [3u8; 32];
        // A binary with no RELATES_TO fields at all will fail to decode as a
        // well-formed cube here since we hand it all-zero bytes; exercise
        // the "decode fails -> not displayable" branch instead, which is the
        // safe default for malformed or not-yet-understood bodies.
        insert_complete(&engine, key, [0u8; 1024]);
        assert!(!engine.is_displayable(&key));
    }

    #[tokio::test]
    async fn cube_displayable_fires_once_across_repeated_propagation() {
        let engine = engine_with(&[2]);
        let miner = verity_cube::HashcashMiner::new(&verity_types::config::HashcashConfig {
            difficulty: 0,
            nonce_bytes: 4,
            worker_pool_enabled: false,
            yield_every: 1000,
        });
        let cancel = verity_cube::CancelToken::new();
        let cube = verity_cube::Cube::builder()
            .payload(b"hi".to_vec())
            .freeze(&miner, &cancel)
            .await
            .unwrap();

        insert_complete(&engine, cube.key, cube.binary);
        let mut events = engine.subscribe_displayable();

        engine.propagate_from(cube.key);
        assert_eq!(events.try_recv().unwrap(), cube.key);
        assert!(events.try_recv().is_err(), "first call emits exactly once");

        // A second propagation pass over the same already-displayable key
        // (e.g. triggered by a winning MUC contest replacement elsewhere)
        // must not re-emit.
        engine.propagate_from(cube.key);
        assert!(
            events.try_recv().is_err(),
            "no transition occurred, so no re-emission"
        );
    }
}
