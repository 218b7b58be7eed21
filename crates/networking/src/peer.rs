// Path: crates/networking/src/peer.rs
//! `SyncPeer`: the per-connection state machine for the gossip protocol
//! (spec §4.7). One `SyncPeer` owns one transport stream, speaks the wire
//! framing in [`crate::wire`], and reports connection-lifecycle events back
//! to its owning `SyncManager` over an `mpsc` channel — the same
//! handle-plus-event-channel shape the teacher's libp2p swarm wrapper used
//! for translating internal state into a public event stream.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use verity_store::{contest_winner, CubeStore};
use verity_types::config::SyncConfig;
use verity_types::error::{ErrorCode, ProtocolError};
use verity_types::wire::CubeKind;

use crate::wire::{CubeSummary, Message, MAX_CUBE_HASH_COUNT};

/// Wire encoding for a [`CubeKind`] in a `HASH_RESPONSE` summary. Distinct
/// from `CubeKind::to_low_bits`, which encodes only the signed kinds'
/// `CUBE_KIND` field value — the summary needs to name Frozen too, since
/// there's no "field absent" signal over the wire.
fn kind_to_wire_byte(kind: CubeKind) -> u8 {
    match kind {
        CubeKind::Frozen => 0,
        CubeKind::Muc => 1,
        CubeKind::Ipc => 2,
    }
}

fn kind_from_wire_byte(b: u8) -> Option<CubeKind> {
    match b {
        0 => Some(CubeKind::Frozen),
        1 => Some(CubeKind::Muc),
        2 => Some(CubeKind::Ipc),
        _ => None,
    }
}

/// Lifecycle events a `SyncPeer` reports to its `SyncManager`.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The handshake completed; the peer is ready for exchange.
    Ready { remote_peer_id: [u8; 16] },
    /// The remote peer advertised addresses via `NODE_RESPONSE`.
    NewPeerAddresses(Vec<String>),
    /// The connection closed without a protocol violation.
    Closed,
    /// The connection closed because the peer violated the protocol or
    /// connected to itself; the manager should blacklist its address.
    Blacklisted { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    New,
    HelloSent,
    Ready,
}

/// Supplies the current set of known peer addresses for `NODE_RESPONSE`.
/// `SyncPeer` only speaks the wire protocol; the address book itself is
/// `SyncManager`'s, so it hands down a closure rather than `SyncPeer`
/// depending on `SyncManager`'s concrete type.
pub type AddressBook = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Drives one peer connection's framing, handshake, and periodic exchange.
pub struct SyncPeer<S> {
    stream: S,
    store: Arc<CubeStore>,
    config: SyncConfig,
    local_peer_id: [u8; 16],
    address_book: AddressBook,
    state: PeerState,
    remote_peer_id: Option<[u8; 16]>,
    /// Keys this peer hasn't been told about yet. Seeded with every complete
    /// key at handshake time, grown by `cubeAdded` events thereafter.
    unsent: BTreeSet<[u8; 32]>,
    /// Keys requested via `CUBE_REQUEST` but not yet answered — only used in
    /// light mode, which never announces its own `unsent` set.
    pending_requests: BTreeSet<[u8; 32]>,
}

impl<S> SyncPeer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: S,
        store: Arc<CubeStore>,
        config: SyncConfig,
        local_peer_id: [u8; 16],
        address_book: AddressBook,
    ) -> Self {
        Self {
            stream,
            store,
            config,
            local_peer_id,
            address_book,
            state: PeerState::New,
            remote_peer_id: None,
            unsent: BTreeSet::new(),
            pending_requests: BTreeSet::new(),
        }
    }

    /// Runs the connection to completion: sends the initial `HELLO`, then
    /// alternates between reading incoming frames and firing periodic
    /// requests once `READY`. Returns when the connection closes, reporting
    /// every lifecycle transition on `events`.
    pub async fn run(mut self, events: mpsc::Sender<PeerEvent>) {
        let hello = Message::Hello {
            peer_id: self.local_peer_id,
        };
        if hello.write_to(&mut self.stream).await.is_err() {
            let _ = events.send(PeerEvent::Closed).await;
            return;
        }
        self.state = PeerState::HelloSent;

        let mut added = self.store.subscribe_added();
        let mut hash_request_timer = tokio::time::interval(Duration::from_millis(
            self.config.hash_request_period_ms,
        ));
        hash_request_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut node_request_timer = tokio::time::interval(Duration::from_millis(
            self.config.node_request_period_ms,
        ));
        node_request_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                message = Message::read_from(&mut self.stream) => {
                    match message {
                        Ok(Some(msg)) => {
                            if let Err(close) = self.handle_message(msg, &events).await {
                                let _ = events.send(close).await;
                                return;
                            }
                        }
                        Ok(None) => {
                            let _ = events.send(PeerEvent::Closed).await;
                            return;
                        }
                        Err(ProtocolError::UnknownMessageClass(class)) => {
                            tracing::debug!(class, "ignoring unknown message class");
                        }
                        Err(e) => {
                            verity_telemetry::sync_metrics().inc_peers_blacklisted();
                            verity_telemetry::error_metrics().inc_error("protocol", e.code());
                            let _ = events
                                .send(PeerEvent::Blacklisted { reason: e.to_string() })
                                .await;
                            return;
                        }
                    }
                }

                added_key = added.recv(), if self.state == PeerState::Ready && !self.config.light_mode => {
                    if let Ok(key) = added_key {
                        self.unsent.insert(key);
                    }
                }

                _ = hash_request_timer.tick(), if self.state == PeerState::Ready && !self.config.light_mode => {
                    if self.send_hash_request().await.is_err() {
                        let _ = events.send(PeerEvent::Closed).await;
                        return;
                    }
                }

                _ = node_request_timer.tick(), if self.state == PeerState::Ready => {
                    if Message::NodeRequest.write_to(&mut self.stream).await.is_err() {
                        let _ = events.send(PeerEvent::Closed).await;
                        return;
                    }
                }
            }
        }
    }

    async fn handle_message(
        &mut self,
        message: Message,
        events: &mpsc::Sender<PeerEvent>,
    ) -> Result<(), PeerEvent> {
        match message {
            Message::Hello { peer_id } => self.handle_hello(peer_id, events).await,
            Message::HashRequest => self.handle_hash_request().await,
            Message::HashResponse { summaries } => self.handle_hash_response(summaries).await,
            Message::CubeRequest { keys } => self.handle_cube_request(keys).await,
            Message::CubeResponse { bodies } => self.handle_cube_response(bodies).await,
            Message::NodeRequest => self.handle_node_request().await,
            Message::NodeResponse { addresses } => {
                let _ = events.send(PeerEvent::NewPeerAddresses(addresses)).await;
                Ok(())
            }
        }
    }

    async fn handle_hello(
        &mut self,
        peer_id: [u8; 16],
        events: &mpsc::Sender<PeerEvent>,
    ) -> Result<(), PeerEvent> {
        if self.state != PeerState::HelloSent {
            return Ok(());
        }
        if peer_id == self.local_peer_id {
            verity_telemetry::error_metrics()
                .inc_error("protocol", ProtocolError::SelfConnection.code());
            return Err(PeerEvent::Blacklisted {
                reason: "peer connected to itself".to_string(),
            });
        }
        self.remote_peer_id = Some(peer_id);
        self.state = PeerState::Ready;
        self.unsent = self.store.all_complete_keys().into_iter().collect();
        let _ = events
            .send(PeerEvent::Ready {
                remote_peer_id: peer_id,
            })
            .await;
        Ok(())
    }

    async fn send_hash_request(&mut self) -> std::io::Result<()> {
        Message::HashRequest.write_to(&mut self.stream).await
    }

    async fn handle_hash_request(&mut self) -> Result<(), PeerEvent> {
        if self.config.light_mode {
            // Light nodes never announce; there is nothing to summarize.
            return Ok(());
        }
        let batch: Vec<[u8; 32]> = self
            .unsent
            .iter()
            .take(MAX_CUBE_HASH_COUNT as usize)
            .copied()
            .collect();
        for key in &batch {
            self.unsent.remove(key);
        }
        let summaries = batch
            .into_iter()
            .filter_map(|key| {
                let info = self.store.get_info(&key)?;
                Some(CubeSummary {
                    kind: kind_to_wire_byte(info.kind?),
                    challenge: info.challenge_level.unwrap_or(0).min(u32::from(u8::MAX)) as u8,
                    date: info.date?,
                    key,
                })
            })
            .collect();
        map_io(
            Message::HashResponse { summaries }
                .write_to(&mut self.stream)
                .await,
        )
    }

    async fn handle_hash_response(&mut self, summaries: Vec<CubeSummary>) -> Result<(), PeerEvent> {
        let mut missing = Vec::new();
        for summary in summaries {
            if self.config.light_mode && !self.pending_requests.remove(&summary.key) {
                continue;
            }
            let Some(kind) = kind_from_wire_byte(summary.kind) else {
                continue;
            };
            match self.store.get_info(&summary.key) {
                None => missing.push(summary.key),
                Some(existing) if !existing.is_complete() => missing.push(summary.key),
                Some(existing) => {
                    let contest_applies = matches!(kind, CubeKind::Muc | CubeKind::Ipc);
                    let incoming_wins = contest_winner(
                        kind,
                        existing.date,
                        existing.challenge_level,
                        summary.date,
                        u32::from(summary.challenge),
                    );
                    if contest_applies && incoming_wins {
                        missing.push(summary.key);
                    }
                }
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        if self.config.light_mode {
            self.pending_requests.extend(missing.iter().copied());
        }
        map_io(
            Message::CubeRequest { keys: missing }
                .write_to(&mut self.stream)
                .await,
        )
    }

    async fn handle_cube_request(&mut self, keys: Vec<[u8; 32]>) -> Result<(), PeerEvent> {
        let bodies = keys
            .into_iter()
            .filter_map(|key| self.store.get_raw(&key))
            .collect();
        map_io(
            Message::CubeResponse { bodies }
                .write_to(&mut self.stream)
                .await,
        )
    }

    async fn handle_cube_response(&mut self, bodies: Vec<[u8; 1024]>) -> Result<(), PeerEvent> {
        for body in bodies {
            if let Err(e) = self.store.add(body.to_vec()).await {
                tracing::debug!(error = %e, "dropping cube from peer response");
                continue;
            }
            verity_telemetry::sync_metrics().inc_cubes_received();
        }
        Ok(())
    }

    async fn handle_node_request(&mut self) -> Result<(), PeerEvent> {
        let addresses = (self.address_book)();
        map_io(
            Message::NodeResponse { addresses }
                .write_to(&mut self.stream)
                .await,
        )
    }
}

fn map_io(result: std::io::Result<()>) -> Result<(), PeerEvent> {
    result.map_err(|e| {
        tracing::debug!(error = %e, "write failed, closing connection");
        PeerEvent::Closed
    })
}

/// Picks up to `n` addresses from `pool` without replacement, uniformly at
/// random. Replaces the teacher-analogous `slice(rnd, 1)` pseudo-removal
/// (§9 bug note 2): that left the original vector untouched and could hand
/// out the same address repeatedly within one call.
pub fn sample_without_replacement(pool: &[String], n: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    let mut shuffled: Vec<&String> = pool.iter().collect();
    shuffled.shuffle(&mut rng);
    shuffled.into_iter().take(n).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn sampling_never_exceeds_pool_or_repeats() {
        let pool: Vec<String> = (0..10).map(|i| format!("10.0.0.{i}:4000")).collect();
        let sample = sample_without_replacement(&pool, 4);
        assert_eq!(sample.len(), 4);
        let unique: std::collections::HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), 4, "sample must not repeat addresses");
    }

    #[test]
    fn sampling_is_roughly_uniform_over_many_draws() {
        let pool: Vec<String> = (0..5).map(|i| format!("peer-{i}")).collect();
        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..5000 {
            for addr in sample_without_replacement(&pool, 1) {
                *counts.entry(addr).or_insert(0) += 1;
            }
        }
        assert_eq!(counts.len(), 5, "every address should be drawn at least once");
        for count in counts.values() {
            assert!(
                (700..1300).contains(count),
                "draw counts should cluster near the 1000 expected per address, got {count}"
            );
        }
    }
}
