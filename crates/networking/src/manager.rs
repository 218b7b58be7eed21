// Path: crates/networking/src/manager.rs
//! `SyncManager`: owns the pool of inbound and outbound peer connections
//! (spec §4.8). Grounded on the teacher's `Libp2pSync` shape — an `Arc<Self>`
//! handle, a background-spawned accept/dial loop, and a translated
//! `mpsc::Receiver<ManagerEvent>` the rest of the node reads from — but with
//! the transport generalized from a libp2p swarm to plain `TcpStream`s
//! speaking the framing in [`crate::wire`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::RngCore;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use verity_store::CubeStore;
use verity_types::config::SyncConfig;

use crate::peer::{sample_without_replacement, PeerEvent, SyncPeer};

/// How many newly-learned addresses to dial per `NODE_RESPONSE`, capped so
/// one chatty peer can't make this node dial its entire advertised list.
const DIAL_FANOUT: usize = 3;

/// Connection-pool events a `verity-node` binary consumes to drive logging,
/// metrics, and operator-facing status.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// The listener bound and is accepting connections.
    Online { address: String },
    /// A new outbound or inbound peer completed its handshake.
    NewPeer { address: String, remote_peer_id: [u8; 16] },
    /// An already-known peer's address book changed (currently emitted
    /// whenever a peer contributes addresses this node already knew about).
    UpdatePeer { address: String },
    /// A peer connection closed without a protocol violation.
    PeerClosed { address: String },
    /// A peer was blacklisted for a protocol violation or self-connection.
    Blacklisted { address: String, reason: String },
    /// The manager is shutting down; no further events follow.
    Shutdown,
}

/// Owns the local peer identity and the set of live connections, accepting
/// inbound streams and dialing outbound ones on request.
pub struct SyncManager {
    store: Arc<CubeStore>,
    config: SyncConfig,
    local_peer_id: [u8; 16],
    connected: Mutex<HashSet<String>>,
    blacklisted: Mutex<HashSet<String>>,
    events_tx: mpsc::Sender<ManagerEvent>,
}

impl SyncManager {
    /// Builds a manager with a fresh random local peer identity. Returns the
    /// manager handle plus the receiver the caller should drain for
    /// lifecycle events.
    pub fn new(store: Arc<CubeStore>, config: SyncConfig) -> (Arc<Self>, mpsc::Receiver<ManagerEvent>) {
        let mut local_peer_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut local_peer_id);
        let (events_tx, events_rx) = mpsc::channel(256);
        let manager = Arc::new(Self {
            store,
            config,
            local_peer_id,
            connected: Mutex::new(HashSet::new()),
            blacklisted: Mutex::new(HashSet::new()),
            events_tx,
        });
        (manager, events_rx)
    }

    /// Binds `addr` and spawns a background task accepting connections
    /// until the listener errors. Each accepted stream becomes a `SyncPeer`
    /// on its own task.
    pub async fn listen(self: &Arc<Self>, addr: &str) -> std::io::Result<std::net::SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let bound = listener.local_addr()?;
        let _ = self
            .events_tx
            .send(ManagerEvent::Online {
                address: bound.to_string(),
            })
            .await;

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let address = peer_addr.to_string();
                        if manager.is_blacklisted(&address) {
                            continue;
                        }
                        manager.clone().spawn_peer(stream, address);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept loop ending");
                        let _ = manager.events_tx.send(ManagerEvent::Shutdown).await;
                        return;
                    }
                }
            }
        });
        Ok(bound)
    }

    /// Dials `address` if it isn't already connected or blacklisted, and if
    /// the connection pool has room under `max_connections`.
    pub async fn connect(self: &Arc<Self>, address: String) -> std::io::Result<()> {
        if self.is_blacklisted(&address) {
            return Ok(());
        }
        {
            let connected = self.connected.lock().unwrap_or_else(|e| e.into_inner());
            if connected.contains(&address) {
                return Ok(());
            }
            if connected.len() >= self.config.max_connections {
                return Ok(());
            }
        }
        let stream = TcpStream::connect(&address).await?;
        self.clone().spawn_peer(stream, address);
        Ok(())
    }

    fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(address)
    }

    fn spawn_peer(self: Arc<Self>, stream: TcpStream, address: String) {
        {
            let mut connected = self.connected.lock().unwrap_or_else(|e| e.into_inner());
            connected.insert(address.clone());
        }
        verity_telemetry::sync_metrics().inc_connected_peers();

        let address_book = {
            let manager = self.clone();
            Arc::new(move || manager.connected_addresses()) as crate::peer::AddressBook
        };
        let peer = SyncPeer::new(
            stream,
            self.store.clone(),
            self.config.clone(),
            self.local_peer_id,
            address_book,
        );
        let (peer_events_tx, mut peer_events_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            peer.run(peer_events_tx).await;
        });

        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(event) = peer_events_rx.recv().await {
                manager.clone().handle_peer_event(&address, event).await;
            }
            manager.on_peer_gone(&address);
        });
    }

    async fn handle_peer_event(self: Arc<Self>, address: &str, event: PeerEvent) {
        match event {
            PeerEvent::Ready { remote_peer_id } => {
                let _ = self
                    .events_tx
                    .send(ManagerEvent::NewPeer {
                        address: address.to_string(),
                        remote_peer_id,
                    })
                    .await;
            }
            PeerEvent::NewPeerAddresses(addresses) => {
                let _ = self
                    .events_tx
                    .send(ManagerEvent::UpdatePeer {
                        address: address.to_string(),
                    })
                    .await;
                let known: Vec<String> = {
                    let connected = self.connected.lock().unwrap_or_else(|e| e.into_inner());
                    let blacklisted = self.blacklisted.lock().unwrap_or_else(|e| e.into_inner());
                    addresses
                        .into_iter()
                        .filter(|a| !connected.contains(a) && !blacklisted.contains(a))
                        .collect()
                };
                for dial_target in sample_without_replacement(&known, DIAL_FANOUT) {
                    if let Err(e) = self.connect(dial_target.clone()).await {
                        tracing::debug!(address = %dial_target, error = %e, "failed to dial learned peer");
                    }
                }
            }
            PeerEvent::Closed => {
                let _ = self
                    .events_tx
                    .send(ManagerEvent::PeerClosed {
                        address: address.to_string(),
                    })
                    .await;
            }
            PeerEvent::Blacklisted { reason } => {
                self.blacklisted
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(address.to_string());
                verity_telemetry::sync_metrics().inc_peers_blacklisted();
                let _ = self
                    .events_tx
                    .send(ManagerEvent::Blacklisted {
                        address: address.to_string(),
                        reason,
                    })
                    .await;
            }
        }
    }

    fn on_peer_gone(&self, address: &str) {
        self.connected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(address);
        verity_telemetry::sync_metrics().dec_connected_peers();
    }

    /// The locally-generated 16-byte peer identity used for `HELLO` and
    /// self-connection detection.
    pub fn local_peer_id(&self) -> [u8; 16] {
        self.local_peer_id
    }

    /// Addresses currently connected (incoming or outgoing).
    pub fn connected_addresses(&self) -> Vec<String> {
        self.connected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_cube::{CancelToken, Cube, HashcashMiner};
    use verity_types::config::{HashcashConfig, PersistenceConfig, StoreConfig};

    fn test_hashcash_config() -> HashcashConfig {
        HashcashConfig {
            difficulty: 4,
            nonce_bytes: 4,
            worker_pool_enabled: false,
            yield_every: 1000,
        }
    }

    async fn test_store() -> Arc<CubeStore> {
        Arc::new(
            CubeStore::open(&StoreConfig {
                hashcash: test_hashcash_config(),
                persistence: PersistenceConfig {
                    persistence_enabled: true,
                    in_memory_persistence: true,
                    data_dir: None,
                },
            })
            .await
            .unwrap(),
        )
    }

    /// Short periods so the test doesn't wait out the production defaults.
    fn fast_sync_config() -> SyncConfig {
        SyncConfig {
            hash_request_period_ms: 50,
            node_request_period_ms: 50,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn two_managers_complete_handshake_over_loopback() {
        let store_a = test_store().await;
        let store_b = test_store().await;
        let (manager_a, mut events_a) = SyncManager::new(store_a, SyncConfig::default());
        let (manager_b, mut events_b) = SyncManager::new(store_b, SyncConfig::default());

        let addr_b = manager_b.listen("127.0.0.1:0").await.unwrap();
        manager_a.connect(addr_b.to_string()).await.unwrap();

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut a_saw_peer = false;
        let mut b_saw_peer = false;
        while !a_saw_peer || !b_saw_peer {
            tokio::select! {
                Some(event) = events_a.recv() => {
                    if matches!(event, ManagerEvent::NewPeer { .. }) {
                        a_saw_peer = true;
                    }
                }
                Some(event) = events_b.recv() => {
                    if matches!(event, ManagerEvent::NewPeer { .. }) {
                        b_saw_peer = true;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    panic!("handshake did not complete within 5s (a={a_saw_peer}, b={b_saw_peer})");
                }
            }
        }
    }

    /// S7 — sync across three peers: B connects to both A and C, A mints 10
    /// cubes, and within a bounded window C ends up with all 10 without any
    /// duplicates and without either peer dialing itself.
    #[tokio::test]
    async fn s7_sync_across_three_peers() {
        let store_a = test_store().await;
        let store_b = test_store().await;
        let store_c = test_store().await;

        let (manager_a, _events_a) = SyncManager::new(store_a.clone(), fast_sync_config());
        let (manager_b, _events_b) = SyncManager::new(store_b, fast_sync_config());
        let (manager_c, _events_c) = SyncManager::new(store_c.clone(), fast_sync_config());

        let addr_a = manager_a.listen("127.0.0.1:0").await.unwrap();
        let addr_c = manager_c.listen("127.0.0.1:0").await.unwrap();

        manager_b.connect(addr_a.to_string()).await.unwrap();
        manager_b.connect(addr_c.to_string()).await.unwrap();

        let miner = HashcashMiner::new(&test_hashcash_config());
        let cancel = CancelToken::new();
        for i in 0..10u8 {
            let cube = Cube::builder()
                .payload(vec![i; 8])
                .freeze(&miner, &cancel)
                .await
                .unwrap();
            store_a.add(cube.binary.to_vec()).await.unwrap();
        }
        assert_eq!(store_a.all_complete_keys().len(), 10);

        let hash_request_period = std::time::Duration::from_millis(50);
        let deadline = tokio::time::Instant::now() + hash_request_period * 3 + std::time::Duration::from_secs(2);
        loop {
            if store_c.all_complete_keys().len() == 10 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "C only has {} of 10 cubes within the bounded window",
                    store_c.all_complete_keys().len()
                );
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let keys = store_c.all_complete_keys();
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len(), "no cube should appear twice");

        assert!(
            manager_a.connected_addresses().iter().all(|a| a != &addr_a.to_string()),
            "A must never connect to itself"
        );
        assert!(
            manager_c.connected_addresses().iter().all(|a| a != &addr_c.to_string()),
            "C must never connect to itself"
        );
    }
}
