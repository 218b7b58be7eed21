// Path: crates/cube/src/hashcash.rs
//! `HashcashMiner`: cooperative, cancellable proof-of-work search over a
//! cube's `PADDING_NONCE` field.
//!
//! The legacy reference miner yielded to the scheduler every fixed 1000
//! iterations; a wall-clock yield interval keeps the node responsive
//! regardless of how fast a given machine hashes, so this port yields on
//! elapsed time instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use verity_types::config::HashcashConfig;
use verity_types::CUBE_SIZE;

/// Signals cancellation across a (possibly parallel) mining search.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation; observed by the next yield check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Errors a mining search can end in besides success.
#[derive(Debug, Error)]
pub enum HashcashError {
    /// The caller requested cancellation before a solution was found.
    #[error("hashcash search was cancelled")]
    Cancelled,
    /// A single worker's nonce stripe was exhausted without a solution
    /// (astronomically unlikely at any configured difficulty).
    #[error("nonce stripe exhausted without finding a solution")]
    ExhaustedStripe,
}

/// The winning buffer and the digest that cleared the configured difficulty.
#[derive(Debug, Clone)]
pub struct MiningResult {
    /// The cube buffer with the winning nonce (and, for signed kinds, the
    /// matching signature) written in.
    pub buffer: [u8; CUBE_SIZE],
    /// The SHA3-256 digest of `buffer` that met the difficulty target.
    pub hash: [u8; 32],
}

/// Where in a cube's `SIGNATURE` field a signed kind's miner must re-sign on
/// every nonce attempt, since the nonce is part of the signed message.
#[derive(Debug, Clone, Copy)]
pub struct SigningTarget {
    /// Byte offset of the `SIGNATURE` field's value (fingerprint + signature).
    pub signature_value_offset: usize,
    /// The signer's raw 32-byte Ed25519 secret key.
    pub secret_key: [u8; 32],
}

/// Finds a nonce (and, for signed cubes, a matching signature) that drives
/// a cube's SHA3-256 digest to the configured number of trailing zero bits.
pub struct HashcashMiner {
    difficulty: u32,
    nonce_bytes: usize,
    worker_pool_enabled: bool,
    yield_interval: Duration,
}

const DEFAULT_YIELD_INTERVAL: Duration = Duration::from_millis(5);

impl HashcashMiner {
    /// Builds a miner from a store's hashcash configuration.
    pub fn new(config: &HashcashConfig) -> Self {
        Self {
            difficulty: config.difficulty,
            nonce_bytes: config.nonce_bytes,
            worker_pool_enabled: config.worker_pool_enabled,
            yield_interval: DEFAULT_YIELD_INTERVAL,
        }
    }

    /// Searches for a nonce starting from an already-encoded buffer.
    ///
    /// `nonce_value_offset` is the byte offset of the `PADDING_NONCE`
    /// field's value, into which the nonce counter is written big-endian.
    /// When `signing` is `Some`, the buffer is re-signed on every attempt
    /// since the nonce is covered by the signature.
    pub async fn mine(
        &self,
        buffer: [u8; CUBE_SIZE],
        nonce_value_offset: usize,
        signing: Option<SigningTarget>,
        cancel: &CancelToken,
    ) -> Result<MiningResult, HashcashError> {
        if self.worker_pool_enabled {
            self.mine_parallel(buffer, nonce_value_offset, signing, cancel)
                .await
        } else {
            Self::mine_stripe(
                buffer,
                nonce_value_offset,
                signing,
                self.difficulty,
                self.nonce_bytes,
                self.yield_interval,
                0,
                0,
                cancel,
            )
            .await
        }
    }

    async fn mine_parallel(
        &self,
        buffer: [u8; CUBE_SIZE],
        nonce_value_offset: usize,
        signing: Option<SigningTarget>,
        cancel: &CancelToken,
    ) -> Result<MiningResult, HashcashError> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .max(1) as u64;
        let stripe = (u32::MAX as u64 + 1) / workers;
        let (tx, mut rx) = tokio::sync::mpsc::channel(workers as usize);
        let mut handles = Vec::with_capacity(workers as usize);

        for i in 0..workers {
            let start = (i * stripe) as u32;
            let end = if i + 1 == workers {
                start
            } else {
                ((i + 1) * stripe) as u32
            };
            let tx = tx.clone();
            let cancel = cancel.clone();
            let difficulty = self.difficulty;
            let nonce_bytes = self.nonce_bytes;
            let yield_interval = self.yield_interval;
            handles.push(tokio::spawn(async move {
                let result = Self::mine_stripe(
                    buffer,
                    nonce_value_offset,
                    signing,
                    difficulty,
                    nonce_bytes,
                    yield_interval,
                    start,
                    end,
                    &cancel,
                )
                .await;
                let _ = tx.send(result).await;
            }));
        }
        drop(tx);

        let mut outcome = Err(HashcashError::ExhaustedStripe);
        while let Some(result) = rx.recv().await {
            if let Ok(winner) = result {
                outcome = Ok(winner);
                cancel.cancel();
                break;
            }
        }
        for handle in handles {
            handle.abort();
        }
        outcome
    }

    /// Searches nonces in `[start, end)` (wrapping-exclusive; `start == end`
    /// means "the whole u32 space").
    #[allow(clippy::too_many_arguments)]
    async fn mine_stripe(
        mut buffer: [u8; CUBE_SIZE],
        nonce_value_offset: usize,
        signing: Option<SigningTarget>,
        difficulty: u32,
        nonce_bytes: usize,
        yield_interval: Duration,
        start: u32,
        end: u32,
        cancel: &CancelToken,
    ) -> Result<MiningResult, HashcashError> {
        let mut nonce = start;
        let mut last_yield = Instant::now();
        let width = nonce_bytes.min(4);

        loop {
            if cancel.is_cancelled() {
                return Err(HashcashError::Cancelled);
            }

            let nonce_be = nonce.to_be_bytes();
            if let Some(dst) = buffer.get_mut(nonce_value_offset..nonce_value_offset + width) {
                dst.copy_from_slice(&nonce_be[4 - width..]);
            }

            if let Some(target) = signing {
                let msg_end = target.signature_value_offset + 8;
                if let Some(msg) = buffer.get(..msg_end) {
                    let sig = verity_crypto::sign(msg, &target.secret_key);
                    if let Some(dst) = buffer
                        .get_mut(target.signature_value_offset + 8..target.signature_value_offset + 72)
                    {
                        dst.copy_from_slice(&sig);
                    }
                }
            }

            let digest = verity_crypto::hash(&buffer);
            if verity_crypto::trailing_zero_bits(&digest) >= difficulty {
                return Ok(MiningResult {
                    buffer,
                    hash: digest,
                });
            }

            nonce = nonce.wrapping_add(1);
            if nonce == end {
                return Err(HashcashError::ExhaustedStripe);
            }

            if last_yield.elapsed() >= yield_interval {
                tokio::task::yield_now().await;
                last_yield = Instant::now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(difficulty: u32) -> HashcashConfig {
        HashcashConfig {
            difficulty,
            nonce_bytes: 4,
            worker_pool_enabled: false,
            yield_every: 1000,
        }
    }

    #[tokio::test]
    async fn mines_trivial_difficulty_immediately() {
        let miner = HashcashMiner::new(&config(0));
        let buffer = [0u8; CUBE_SIZE];
        let cancel = CancelToken::new();
        let result = miner.mine(buffer, 6, None, &cancel).await.unwrap();
        assert!(verity_crypto::trailing_zero_bits(&result.hash) >= 0);
    }

    #[tokio::test]
    async fn mines_small_real_difficulty() {
        let miner = HashcashMiner::new(&config(8));
        let buffer = [0u8; CUBE_SIZE];
        let cancel = CancelToken::new();
        let result = miner.mine(buffer, 6, None, &cancel).await.unwrap();
        assert!(verity_crypto::trailing_zero_bits(&result.hash) >= 8);
    }

    #[tokio::test]
    async fn cancellation_is_observed() {
        let miner = HashcashMiner::new(&config(30));
        let buffer = [0u8; CUBE_SIZE];
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = miner.mine(buffer, 6, None, &cancel).await.unwrap_err();
        assert!(matches!(err, HashcashError::Cancelled));
    }

    #[tokio::test]
    async fn worker_pool_finds_same_difficulty_target() {
        let mut config = config(8);
        config.worker_pool_enabled = true;
        let miner = HashcashMiner::new(&config);
        let buffer = [0u8; CUBE_SIZE];
        let cancel = CancelToken::new();
        let result = miner.mine(buffer, 6, None, &cancel).await.unwrap();
        assert!(verity_crypto::trailing_zero_bits(&result.hash) >= 8);
    }
}
