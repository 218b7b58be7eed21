// Path: crates/types/src/config/mod.rs

//! Shared configuration structures for the Verity kernel.
//!
//! Each subsystem gets its own struct with `#[serde(default = "fn")]`
//! defaults matching the bracketed defaults in the network's configuration
//! surface, and a `validate()` that rejects semantically invalid combinations
//! before the subsystem is constructed.

use serde::{Deserialize, Serialize};

fn default_difficulty() -> u32 {
    12
}
fn default_max_connections() -> usize {
    20
}
fn default_hash_request_period_ms() -> u64 {
    10_000
}
fn default_node_request_period_ms() -> u64 {
    60_000
}
fn default_announcement_period_ms() -> u64 {
    25 * 60 * 1000
}
fn default_reconnect_period_ms() -> u64 {
    10_000
}
fn default_reconnect_attempts() -> u32 {
    2
}
fn default_hashcash_nonce_bytes() -> usize {
    4
}
fn default_yield_every() -> u32 {
    1_000
}

/// Configuration for `HashcashMiner`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashcashConfig {
    /// Required trailing zero bits on `hash(binary)`.
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    /// Width, in bytes, of the nonce counter inside the `PADDING_NONCE` field.
    #[serde(default = "default_hashcash_nonce_bytes")]
    pub nonce_bytes: usize,
    /// Whether to stripe the nonce space across a worker pool instead of
    /// searching sequentially on the calling task.
    #[serde(default)]
    pub worker_pool_enabled: bool,
    /// Attempts between cooperative yields of the mining loop.
    #[serde(default = "default_yield_every")]
    pub yield_every: u32,
}

impl Default for HashcashConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            nonce_bytes: default_hashcash_nonce_bytes(),
            worker_pool_enabled: false,
            yield_every: default_yield_every(),
        }
    }
}

impl HashcashConfig {
    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.nonce_bytes == 0 || self.nonce_bytes > 4 {
            return Err(
                "Configuration Error: 'nonce_bytes' must be between 1 and 4.".to_string(),
            );
        }
        if self.difficulty as usize > self.nonce_bytes * 8 + 256 {
            return Err(
                "Configuration Error: 'difficulty' exceeds what this digest size can ever satisfy."
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Configuration for `PersistenceAdapter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Whether to persist at all; when `false`, cubes live only in memory.
    #[serde(default = "default_true")]
    pub persistence_enabled: bool,
    /// When `true`, use an in-process ephemeral backend instead of a file on disk.
    #[serde(default)]
    pub in_memory_persistence: bool,
    /// Filesystem path to the Cubes DB, when persistence is file-backed.
    #[serde(default)]
    pub data_dir: Option<std::path::PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            persistence_enabled: true,
            in_memory_persistence: false,
            data_dir: None,
        }
    }
}

impl PersistenceConfig {
    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.persistence_enabled && !self.in_memory_persistence && self.data_dir.is_none() {
            return Err(
                "Configuration Error: 'data_dir' is required when persistence is enabled and not in-memory."
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Configuration for `CubeStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Hashcash configuration applied to cubes this node mints.
    #[serde(default)]
    pub hashcash: HashcashConfig,
    /// Persistence configuration for the Cubes DB.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hashcash: HashcashConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        self.hashcash.validate()?;
        self.persistence.validate()?;
        Ok(())
    }
}

/// Configuration for `SyncPeer` and `SyncManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum number of simultaneous incoming + outgoing connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How often a full node sends `HASH_REQUEST`, in milliseconds.
    #[serde(default = "default_hash_request_period_ms")]
    pub hash_request_period_ms: u64,
    /// How often a peer is asked for its known peer addresses, in milliseconds.
    #[serde(default = "default_node_request_period_ms")]
    pub node_request_period_ms: u64,
    /// How often a full node re-broadcasts its complete key set, in milliseconds.
    #[serde(default = "default_announcement_period_ms")]
    pub announcement_period_ms: u64,
    /// Delay before a dropped outgoing connection is retried, in milliseconds.
    #[serde(default = "default_reconnect_period_ms")]
    pub reconnect_period_ms: u64,
    /// Number of reconnect attempts before an address is given up on.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Light nodes never send `HASH_REQUEST` and only honor `HASH_RESPONSE`
    /// for keys they explicitly requested.
    #[serde(default)]
    pub light_mode: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            hash_request_period_ms: default_hash_request_period_ms(),
            node_request_period_ms: default_node_request_period_ms(),
            announcement_period_ms: default_announcement_period_ms(),
            reconnect_period_ms: default_reconnect_period_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            light_mode: false,
        }
    }
}

impl SyncConfig {
    /// Validates the configuration for semantic correctness.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("Configuration Error: 'max_connections' must be greater than 0.".to_string());
        }
        if self.hash_request_period_ms == 0 {
            return Err(
                "Configuration Error: 'hash_request_period_ms' must be greater than 0.".to_string(),
            );
        }
        Ok(())
    }
}

/// Top-level configuration aggregating every subsystem, as loaded by the
/// `verity-node` binary from TOML with CLI/environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VerityConfig {
    /// `CubeStore` and hashcash configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Sync protocol configuration.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl VerityConfig {
    /// Validates every subsystem's configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(VerityConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_connections_rejected() {
        let mut cfg = SyncConfig::default();
        cfg.max_connections = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn persistence_without_data_dir_rejected() {
        let mut cfg = PersistenceConfig::default();
        cfg.persistence_enabled = true;
        cfg.in_memory_persistence = false;
        cfg.data_dir = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = VerityConfig::default();
        let s = toml::to_string(&cfg).expect("serialize");
        let back: VerityConfig = toml::from_str(&s).expect("deserialize");
        assert_eq!(back.sync.max_connections, cfg.sync.max_connections);
    }
}
