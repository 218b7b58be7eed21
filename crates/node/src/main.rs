// Path: crates/node/src/main.rs
#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use verity_crypto::key_store;
use verity_sync::{ManagerEvent, SyncManager};
use verity_store::CubeStore;
use verity_types::config::VerityConfig;

/// The default passphrase for the local signing key when running without an
/// operator-supplied one. Mirrors the teacher's own local-development
/// convenience default; never used unless `VERITY_KEY_PASSPHRASE` is unset.
const LOCAL_DEV_PASSPHRASE: &str = "verity-local-dev";

#[derive(Parser, Debug)]
#[clap(name = "verity-node", about = "A Verity gossip network node")]
struct Opts {
    /// Directory for the Cubes DB and the operator's signing key.
    #[clap(long, default_value = "./verity-data")]
    data_dir: PathBuf,

    /// Path to a TOML config file overriding the built-in defaults.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Address this node listens for inbound peer connections on.
    #[clap(long, default_value = "0.0.0.0:7776")]
    listen: String,

    /// Address this node exposes `/metrics`, `/healthz`, `/readyz` on. Telemetry
    /// is disabled if omitted.
    #[clap(long)]
    metrics_addr: Option<std::net::SocketAddr>,

    /// Peer addresses to dial on startup (may be repeated).
    #[clap(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    verity_telemetry::init::init_tracing()?;
    let opts = Opts::parse();
    std::fs::create_dir_all(&opts.data_dir)
        .with_context(|| format!("creating data dir {:?}", opts.data_dir))?;

    let config = load_config(&opts)?;
    config.validate().map_err(anyhow::Error::msg)?;

    if let Ok(sink) = verity_telemetry::prometheus::install() {
        let _ = verity_telemetry::sinks::SINK.set(sink);
    } else {
        tracing::warn!("prometheus metrics registration failed; continuing without metrics");
    }

    let (public_key, _secret_key) = load_or_generate_identity(&opts.data_dir)?;
    tracing::info!(public_key = %hex::encode(public_key), "node identity ready");

    let store = std::sync::Arc::new(CubeStore::open(&config.store).await?);
    let (manager, mut events) = SyncManager::new(store.clone(), config.sync.clone());

    let bound = manager.listen(&opts.listen).await?;
    tracing::info!(addr = %bound, "listening for peers");

    for peer_addr in &opts.peers {
        if let Err(e) = manager.connect(peer_addr.clone()).await {
            tracing::warn!(address = %peer_addr, error = %e, "failed to dial configured peer");
        }
    }

    if let Some(metrics_addr) = opts.metrics_addr {
        tokio::spawn(async move {
            verity_telemetry::http::run_server(metrics_addr).await;
        });
    }

    let events_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_manager_event(&event);
        }
    });

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutting down");
    events_task.abort();
    Ok(())
}

fn load_config(opts: &Opts) -> Result<VerityConfig> {
    let mut config = match &opts.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {path:?}"))?;
            toml::from_str(&raw).with_context(|| format!("parsing config file {path:?}"))?
        }
        None => VerityConfig::default(),
    };
    if !config.store.persistence.in_memory_persistence && config.store.persistence.data_dir.is_none() {
        config.store.persistence.data_dir = Some(opts.data_dir.join("cubes.redb"));
    }
    Ok(config)
}

/// Loads the operator's Ed25519 signing key from `data_dir/identity.key`,
/// generating and encrypting a fresh one on first run.
fn load_or_generate_identity(data_dir: &std::path::Path) -> Result<([u8; 32], [u8; 32])> {
    let key_path = data_dir.join("identity.key");
    let passphrase = std::env::var("VERITY_KEY_PASSPHRASE").unwrap_or_else(|_| {
        tracing::warn!("VERITY_KEY_PASSPHRASE not set; using the local-development default");
        LOCAL_DEV_PASSPHRASE.to_string()
    });

    if key_path.exists() {
        let secret = key_store::load_signing_key(&key_path, &passphrase)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let sk: [u8; 32] = secret
            .0
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("identity.key did not decrypt to a 32-byte key"))?;
        let pk = verity_crypto::public_key_for(&sk).map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok((pk, sk))
    } else {
        tracing::info!(path = %key_path.display(), "generating new node identity");
        let (pk, sk) = verity_crypto::generate_keypair();
        let encrypted = key_store::encrypt_key(&sk, &passphrase).map_err(|e| anyhow::anyhow!("{e}"))?;
        std::fs::write(&key_path, encrypted)
            .with_context(|| format!("writing {key_path:?}"))?;
        Ok((pk, sk))
    }
}

fn log_manager_event(event: &ManagerEvent) {
    match event {
        ManagerEvent::Online { address } => tracing::info!(address = %address, "online"),
        ManagerEvent::NewPeer { address, remote_peer_id } => {
            tracing::info!(address = %address, peer_id = %hex::encode(remote_peer_id), "newpeer")
        }
        ManagerEvent::UpdatePeer { address } => tracing::debug!(address = %address, "updatepeer"),
        ManagerEvent::PeerClosed { address } => tracing::info!(address = %address, "peerclosed"),
        ManagerEvent::Blacklisted { address, reason } => {
            tracing::warn!(address = %address, reason = %reason, "blacklist")
        }
        ManagerEvent::Shutdown => tracing::info!("sync manager shutdown"),
    }
}
