// Path: crates/storage/src/persistence.rs
//! `PersistenceAdapter`: a redb-backed Cubes DB. One table, keyed by the
//! cube's 32-byte key (hex-encoded), valued by its 1024-byte binary.
//!
//! Writes go through a bounded channel to a dedicated background thread, the
//! same shape the teacher's epoch store used for its state-tree commits:
//! `put()` never blocks the caller on disk I/O, and backpressure falls out
//! of the channel filling up rather than an unbounded queue.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::thread;

use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::{mpsc, oneshot};

use verity_types::config::PersistenceConfig;
use verity_types::error::{ErrorCode, PersistenceError};

const CUBES: TableDefinition<&str, &[u8]> = TableDefinition::new("CUBES");
const META: TableDefinition<&str, u32> = TableDefinition::new("META");
const SCHEMA_VERSION_KEY: &str = "schema_version";

/// The on-disk schema version this binary writes and expects to find.
///
/// A mismatch at [`PersistenceAdapter::open`] is fatal (spec §6.2): there is
/// no migration path, only a version check that refuses to run against an
/// incompatible database.
pub const SCHEMA_VERSION: u32 = 3;

#[derive(Debug)]
enum PersistenceOp {
    Put(String, Vec<u8>, oneshot::Sender<Result<(), PersistenceError>>),
}

/// A handle to the Cubes DB: either a real redb-backed store or an
/// in-memory stand-in (`in_memory_persistence`), behind the same interface.
#[derive(Clone)]
pub struct PersistenceAdapter {
    inner: Arc<Inner>,
}

enum Inner {
    Disk {
        db: Arc<Database>,
        tx: mpsc::Sender<PersistenceOp>,
        _flusher: Arc<thread::JoinHandle<()>>,
    },
    Memory {
        map: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    },
}

impl PersistenceAdapter {
    /// Opens the Cubes DB per `config`, validating (or stamping) the schema
    /// version. Blocking I/O is offloaded to `spawn_blocking` so this stays
    /// a cooperative `async fn`.
    pub async fn open(config: &PersistenceConfig) -> Result<Self, PersistenceError> {
        if !config.persistence_enabled || config.in_memory_persistence {
            return Ok(Self {
                inner: Arc::new(Inner::Memory {
                    map: Arc::new(RwLock::new(HashMap::new())),
                }),
            });
        }

        let data_dir = config.data_dir.clone().ok_or(PersistenceError::NotReady)?;
        let adapter = tokio::task::spawn_blocking(move || Self::open_disk(&data_dir))
            .await
            .map_err(|e| PersistenceError::Backend(e.to_string()))??;
        Ok(adapter)
    }

    fn open_disk(data_dir: &Path) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
        let db_path: PathBuf = data_dir.join("cubes.redb");
        let db = Database::create(&db_path).map_err(|e| PersistenceError::Backend(e.to_string()))?;

        {
            let write_txn = db.begin_write().map_err(|e| PersistenceError::Backend(e.to_string()))?;
            {
                // Opening the table is enough to create it on a fresh database.
                let _cubes = write_txn
                    .open_table(CUBES)
                    .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                let mut meta = write_txn
                    .open_table(META)
                    .map_err(|e| PersistenceError::Backend(e.to_string()))?;

                match meta
                    .get(SCHEMA_VERSION_KEY)
                    .map_err(|e| PersistenceError::Backend(e.to_string()))?
                {
                    Some(existing) => {
                        let on_disk = existing.value();
                        if on_disk != SCHEMA_VERSION {
                            return Err(PersistenceError::SchemaMismatch {
                                on_disk,
                                expected: SCHEMA_VERSION,
                            });
                        }
                    }
                    None => {
                        meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)
                            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                    }
                }
            }
            write_txn.commit().map_err(|e| PersistenceError::Backend(e.to_string()))?;
        }

        let db = Arc::new(db);
        let (tx, rx) = mpsc::channel::<PersistenceOp>(1024);
        let writer_db = db.clone();
        let handle = thread::spawn(move || Self::run_writer(writer_db, rx));

        Ok(Self {
            inner: Arc::new(Inner::Disk {
                db,
                tx,
                _flusher: Arc::new(handle),
            }),
        })
    }

    fn run_writer(db: Arc<Database>, mut rx: mpsc::Receiver<PersistenceOp>) {
        while let Some(op) = rx.blocking_recv() {
            match op {
                PersistenceOp::Put(key, bytes, ack) => {
                    let write_timer = verity_telemetry::time::Timer::new(|secs| {
                        verity_telemetry::storage_metrics().observe_write_duration(secs);
                    });
                    let result = (|| -> Result<(), PersistenceError> {
                        let write_txn = db
                            .begin_write()
                            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                        {
                            let mut table = write_txn
                                .open_table(CUBES)
                                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                            table
                                .insert(key.as_str(), bytes.as_slice())
                                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                        }
                        write_txn
                            .commit()
                            .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                        verity_telemetry::storage_metrics().inc_bytes_written_total(bytes.len() as u64);
                        Ok(())
                    })();
                    drop(write_timer);
                    if let Err(e) = &result {
                        verity_telemetry::storage_metrics().inc_put_errors_total();
                        verity_telemetry::error_metrics().inc_error("storage", e.code());
                    }
                    let _ = ack.send(result);
                }
            }
        }
    }

    /// Persists a cube's raw binary under its hex-encoded key.
    ///
    /// Queues the write onto the background thread and awaits its result;
    /// the caller is never blocked on the redb commit itself, only on the
    /// channel round-trip.
    pub async fn put(&self, key: &[u8; 32], binary: &[u8; 1024]) -> Result<(), PersistenceError> {
        let hex_key = hex::encode(key);
        match &*self.inner {
            Inner::Memory { map } => {
                let mut guard = map.write().map_err(|_| {
                    PersistenceError::Backend("in-memory persistence lock poisoned".into())
                })?;
                guard.insert(hex_key, binary.to_vec());
                Ok(())
            }
            Inner::Disk { tx, .. } => {
                let (ack_tx, ack_rx) = oneshot::channel();
                tx.send(PersistenceOp::Put(hex_key, binary.to_vec(), ack_tx))
                    .await
                    .map_err(|_| PersistenceError::Backend("writer thread has shut down".into()))?;
                ack_rx
                    .await
                    .map_err(|_| PersistenceError::Backend("writer thread dropped the ack".into()))?
            }
        }
    }

    /// Streams every `(key, binary)` pair currently persisted, for startup
    /// hydration of the in-memory `CubeStore`.
    pub async fn iter(
        &self,
    ) -> Result<impl futures::Stream<Item = ([u8; 32], Vec<u8>)>, PersistenceError> {
        let entries = match &*self.inner {
            Inner::Memory { map } => {
                let guard = map.read().map_err(|_| {
                    PersistenceError::Backend("in-memory persistence lock poisoned".into())
                })?;
                guard
                    .iter()
                    .filter_map(|(k, v)| decode_key(k).map(|key| (key, v.clone())))
                    .collect::<Vec<_>>()
            }
            Inner::Disk { db, .. } => {
                let db = db.clone();
                tokio::task::spawn_blocking(move || -> Result<Vec<([u8; 32], Vec<u8>)>, PersistenceError> {
                    let read_txn = db
                        .begin_read()
                        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                    let table = read_txn
                        .open_table(CUBES)
                        .map_err(|e| PersistenceError::Backend(e.to_string()))?;
                    let mut out = Vec::new();
                    for row in table.iter().map_err(|e| PersistenceError::Backend(e.to_string()))? {
                        let (k, v) = row.map_err(|e| PersistenceError::Backend(e.to_string()))?;
                        if let Some(key) = decode_key(k.value()) {
                            out.push((key, v.value().to_vec()));
                        }
                    }
                    Ok(out)
                })
                .await
                .map_err(|e| PersistenceError::Backend(e.to_string()))??
            }
        };
        Ok(futures::stream::iter(entries))
    }
}

fn decode_key(hex_key: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_key).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn memory_config() -> PersistenceConfig {
        PersistenceConfig {
            persistence_enabled: true,
            in_memory_persistence: true,
            data_dir: None,
        }
    }

    #[tokio::test]
    async fn in_memory_put_and_iter_roundtrip() {
        let adapter = PersistenceAdapter::open(&memory_config()).await.unwrap();
        let key = [7u8; 32];
        let binary = [9u8; 1024];
        adapter.put(&key, &binary).await.unwrap();

        let rows: Vec<_> = adapter.iter().await.unwrap().collect().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, key);
        assert_eq!(rows[0].1, binary.to_vec());
    }

    #[tokio::test]
    async fn disk_backed_roundtrip_and_schema_check() {
        let dir = tempfile::tempdir().unwrap();
        let config = PersistenceConfig {
            persistence_enabled: true,
            in_memory_persistence: false,
            data_dir: Some(dir.path().to_path_buf()),
        };
        let key = [3u8; 32];
        let binary = [5u8; 1024];
        {
            let adapter = PersistenceAdapter::open(&config).await.unwrap();
            adapter.put(&key, &binary).await.unwrap();
        }
        // Reopen: schema version must still match and data must survive.
        let adapter = PersistenceAdapter::open(&config).await.unwrap();
        let rows: Vec<_> = adapter.iter().await.unwrap().collect().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, key);
    }
}
