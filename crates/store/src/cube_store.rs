// Path: crates/store/src/cube_store.rs
//! `CubeStore`: the in-memory, key-addressed index of every cube this node
//! knows about, backed by `PersistenceAdapter` and collaborating with
//! `AnnotationEngine` for reverse-relationship propagation (§4.5).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use futures::StreamExt;
use tokio::sync::broadcast;

use verity_cube::Cube;
use verity_storage::PersistenceAdapter;
use verity_types::config::StoreConfig;
use verity_types::cube_info::CubeInfo;
use verity_types::error::{CubeError, ErrorCode, StoreError};
use verity_types::wire::{CubeKind, RelationshipType};

use crate::annotation_engine::AnnotationEngine;
use crate::lifetime::contest_winner;

const ADDED_CHANNEL_CAPACITY: usize = 1024;

/// Input to [`CubeStore::add`]: either a raw inbound binary or an
/// already-parsed, already-validated [`Cube`] (e.g. one this node just
/// mined itself).
pub enum AddInput {
    /// Raw bytes straight off the wire or out of the persistence layer.
    Bytes(Vec<u8>),
    /// A cube already parsed and integrity-checked by the caller.
    Parsed(Cube),
}

impl From<Vec<u8>> for AddInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Cube> for AddInput {
    fn from(cube: Cube) -> Self {
        Self::Parsed(cube)
    }
}

/// The in-memory cube index plus its persistence and annotation collaborators.
pub struct CubeStore {
    infos: Arc<RwLock<HashMap<[u8; 32], CubeInfo>>>,
    persistence: PersistenceAdapter,
    annotation: AnnotationEngine,
    added_tx: broadcast::Sender<[u8; 32]>,
    difficulty: u32,
}

impl CubeStore {
    /// Opens the store: connects persistence, then hydrates the in-memory
    /// index from it (§4.5.2) before returning.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let persistence = PersistenceAdapter::open(&config.persistence).await?;
        let infos: Arc<RwLock<HashMap<[u8; 32], CubeInfo>>> = Arc::new(RwLock::new(HashMap::new()));

        let mut policy_types = BTreeSet::new();
        policy_types.insert(RelationshipType::ReplyTo.to_byte());
        let annotation = AnnotationEngine::new(infos.clone(), policy_types);

        let (added_tx, _) = broadcast::channel(ADDED_CHANNEL_CAPACITY);

        let store = Self {
            infos,
            persistence,
            annotation,
            added_tx,
            difficulty: config.hashcash.difficulty,
        };
        store.hydrate().await?;
        Ok(store)
    }

    /// Loads every stored cube through `add`, then re-writes the union of
    /// in-memory cubes back to the store. Idempotent: conflicts resolve via
    /// the same contest rules `add` always applies.
    async fn hydrate(&self) -> Result<(), StoreError> {
        let mut rows = self.persistence.iter().await?;
        while let Some((_key, binary)) = rows.next().await {
            if let Err(e) = self.add(binary).await {
                tracing::warn!(error = %e, "discarding malformed cube found during hydration");
            }
        }

        let snapshot: Vec<([u8; 32], [u8; 1024])> = {
            let infos = self.infos.read().unwrap_or_else(|e| e.into_inner());
            infos
                .values()
                .filter_map(|info| info.binary.map(|b| (info.key, b)))
                .collect()
        };
        for (key, binary) in snapshot {
            self.persistence.put(&key, &binary).await?;
        }
        Ok(())
    }

    /// Adds a cube, per §4.5: parses if raw bytes, resolves duplicates and
    /// MUC/IPC contests, updates reverse edges, persists (fire-and-forget),
    /// and emits `cubeAdded`.
    pub async fn add(&self, input: impl Into<AddInput>) -> Result<[u8; 32], StoreError> {
        let result = self.add_inner(input).await;
        if let Err(e) = &result {
            verity_telemetry::error_metrics().inc_error("store", e.code());
        }
        result
    }

    async fn add_inner(&self, input: impl Into<AddInput>) -> Result<[u8; 32], StoreError> {
        let cube = match input.into() {
            AddInput::Bytes(bytes) => Cube::parse(&bytes, self.difficulty).map_err(CubeError::from)?,
            AddInput::Parsed(cube) => cube,
        };
        let key = cube.key;
        let relationships = cube.relationships().map_err(CubeError::from)?;

        let changed = self.merge(&cube)?;
        if !changed {
            return Ok(key);
        }

        self.annotation.on_cube_added(key, &relationships);

        // Persist fire-and-forget: the caller is never blocked on disk I/O.
        let persistence = self.persistence.clone();
        let binary = cube.binary;
        tokio::spawn(async move {
            if let Err(e) = persistence.put(&key, &binary).await {
                tracing::warn!(error = %e, "failed to persist cube after add");
            }
        });

        let _ = self.added_tx.send(key);
        Ok(key)
    }

    /// Applies the incoming cube to the in-memory map per the duplicate and
    /// contest rules. Returns `true` if the map changed (a caller should
    /// then run reverse-indexing, propagation, and persistence).
    fn merge(&self, cube: &Cube) -> Result<bool, StoreError> {
        let mut infos = self.infos.write().unwrap_or_else(|e| e.into_inner());

        match infos.get(&cube.key) {
            Some(existing) if existing.is_complete() => {
                if matches!(cube.kind, CubeKind::Muc) {
                    if incoming_wins_contest(existing, cube) {
                        let mut updated = existing.clone();
                        updated.binary = Some(cube.binary);
                        updated.kind = Some(cube.kind);
                        updated.date = Some(cube.date);
                        updated.challenge_level = Some(cube.challenge_level);
                        infos.insert(cube.key, updated);
                        verity_telemetry::store_metrics().inc_muc_contest_replacements();
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                } else if matches!(cube.kind, CubeKind::Ipc) {
                    if incoming_wins_contest(existing, cube) {
                        let mut updated = existing.clone();
                        updated.binary = Some(cube.binary);
                        updated.kind = Some(cube.kind);
                        updated.date = Some(cube.date);
                        updated.challenge_level = Some(cube.challenge_level);
                        infos.insert(cube.key, updated);
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                } else {
                    // Frozen: already complete under this key, silently ignored.
                    Ok(false)
                }
            }
            maybe_placeholder => {
                let mut info = maybe_placeholder
                    .cloned()
                    .unwrap_or_else(|| CubeInfo::placeholder(cube.key));
                info.binary = Some(cube.binary);
                info.kind = Some(cube.kind);
                info.date = Some(cube.date);
                info.challenge_level = Some(cube.challenge_level);
                infos.insert(cube.key, info);
                Ok(true)
            }
        }
    }

    /// Whether this key is known at all (complete or placeholder).
    pub fn has(&self, key: &[u8; 32]) -> bool {
        self.infos.read().unwrap_or_else(|e| e.into_inner()).contains_key(key)
    }

    /// Fetches and parses the stored cube for `key`, if complete.
    pub fn get(&self, key: &[u8; 32]) -> Option<Cube> {
        let binary = self.get_raw(key)?;
        Cube::parse(&binary, self.difficulty).ok()
    }

    /// Fetches the raw 1024-byte binary for `key`, if complete.
    pub fn get_raw(&self, key: &[u8; 32]) -> Option<[u8; 1024]> {
        let infos = self.infos.read().unwrap_or_else(|e| e.into_inner());
        infos.get(key).and_then(|info| info.binary)
    }

    /// Fetches the metadata record for `key`, complete or placeholder.
    pub fn get_info(&self, key: &[u8; 32]) -> Option<CubeInfo> {
        self.infos.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    /// Every key with a complete `CubeInfo`.
    pub fn all_complete_keys(&self) -> Vec<[u8; 32]> {
        self.infos
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|info| info.is_complete())
            .map(|info| info.key)
            .collect()
    }

    /// Every complete `CubeInfo`.
    pub fn all_complete_infos(&self) -> Vec<CubeInfo> {
        self.infos
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|info| info.is_complete())
            .cloned()
            .collect()
    }

    /// Subscribes to `cubeAdded` events.
    pub fn subscribe_added(&self) -> broadcast::Receiver<[u8; 32]> {
        self.added_tx.subscribe()
    }

    /// Subscribes to `cubeDisplayable` events, relayed from the `AnnotationEngine`.
    pub fn subscribe_displayable(&self) -> broadcast::Receiver<[u8; 32]> {
        self.annotation.subscribe_displayable()
    }
}

/// Resolves a MUC or IPC contest per §4.5.1. Returns `true` if `incoming`
/// should replace `stored`.
fn incoming_wins_contest(stored: &CubeInfo, incoming: &Cube) -> bool {
    contest_winner(
        incoming.kind,
        stored.date,
        stored.challenge_level,
        incoming.date,
        incoming.challenge_level,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_cube::{CancelToken, HashcashMiner};
    use verity_types::config::{HashcashConfig, PersistenceConfig};

    fn test_config() -> StoreConfig {
        StoreConfig {
            hashcash: HashcashConfig {
                difficulty: 4,
                nonce_bytes: 4,
                worker_pool_enabled: false,
                yield_every: 1000,
            },
            persistence: PersistenceConfig {
                persistence_enabled: true,
                in_memory_persistence: true,
                data_dir: None,
            },
        }
    }

    fn test_miner() -> HashcashMiner {
        HashcashMiner::new(&HashcashConfig {
            difficulty: 4,
            nonce_bytes: 4,
            worker_pool_enabled: false,
            yield_every: 1000,
        })
    }

    #[tokio::test]
    async fn s4_duplicate_add_is_ignored() {
        let store = CubeStore::open(&test_config()).await.unwrap();
        let miner = test_miner();
        let cancel = CancelToken::new();
        let cube = Cube::builder()
            .payload(b"hello".to_vec())
            .freeze(&miner, &cancel)
            .await
            .unwrap();

        let mut added = store.subscribe_added();
        store.add(cube.binary.to_vec()).await.unwrap();
        store.add(cube.binary.to_vec()).await.unwrap();

        assert_eq!(store.all_complete_keys().len(), 1);
        let first = added.try_recv().unwrap();
        assert_eq!(first, cube.key);
        assert!(added.try_recv().is_err(), "cubeAdded must fire exactly once");
    }

    #[tokio::test]
    async fn s5_muc_contest_prefers_later_date() {
        let store = CubeStore::open(&test_config()).await.unwrap();
        let miner = test_miner();
        let (pk, sk) = verity_crypto::generate_keypair();

        let m1 = Cube::builder()
            .with_date(1_000)
            .payload(b"v1".to_vec())
            .muc(pk, sk)
            .freeze(&miner, &CancelToken::new())
            .await
            .unwrap();
        let m2 = Cube::builder()
            .with_date(1_001)
            .payload(b"v2".to_vec())
            .muc(pk, sk)
            .freeze(&miner, &CancelToken::new())
            .await
            .unwrap();

        let mut added = store.subscribe_added();
        store.add(m1.binary.to_vec()).await.unwrap();
        store.add(m2.binary.to_vec()).await.unwrap();

        let stored = store.get(&pk).expect("muc stored under public key");
        assert_eq!(stored.date, 1_001);
        assert_eq!(added.try_recv().unwrap(), pk);
        assert_eq!(added.try_recv().unwrap(), pk);
    }

    #[tokio::test]
    async fn s5_muc_contest_ties_prefer_stored() {
        let store = CubeStore::open(&test_config()).await.unwrap();
        let miner = test_miner();
        let (pk, sk) = verity_crypto::generate_keypair();

        let m1 = Cube::builder()
            .with_date(2_000)
            .payload(b"first".to_vec())
            .muc(pk, sk)
            .freeze(&miner, &CancelToken::new())
            .await
            .unwrap();
        let m2 = Cube::builder()
            .with_date(2_000)
            .payload(b"second".to_vec())
            .muc(pk, sk)
            .freeze(&miner, &CancelToken::new())
            .await
            .unwrap();

        store.add(m1.binary.to_vec()).await.unwrap();
        store.add(m2.binary.to_vec()).await.unwrap();

        let stored = store.get(&pk).unwrap();
        assert_eq!(stored.payload().unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn s6_displayability_propagates_in_dependency_order() {
        let store = CubeStore::open(&test_config()).await.unwrap();
        let miner = test_miner();

        let root = Cube::builder()
            .payload(b"root".to_vec())
            .freeze(&miner, &CancelToken::new())
            .await
            .unwrap();
        let leaf = Cube::builder()
            .payload(b"leaf".to_vec())
            .relates_to(RelationshipType::ReplyTo.to_byte(), root.key)
            .freeze(&miner, &CancelToken::new())
            .await
            .unwrap();

        let mut displayable = store.subscribe_displayable();

        store.add(leaf.binary.to_vec()).await.unwrap();
        assert!(
            displayable.try_recv().is_err(),
            "leaf alone must not be displayable before its parent exists"
        );

        store.add(root.binary.to_vec()).await.unwrap();
        assert_eq!(displayable.try_recv().unwrap(), root.key);
        assert_eq!(displayable.try_recv().unwrap(), leaf.key);
        assert!(displayable.try_recv().is_err());
    }
}
