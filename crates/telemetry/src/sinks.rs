// Path: crates/telemetry/src/sinks.rs
//! Defines abstract traits for metrics reporting, decoupling core logic from the backend.

use once_cell::sync::OnceCell;

// --- Static Sink Access ---

/// A no-op sink for use in tests or when telemetry is disabled.
#[derive(Debug, Clone, Copy)]
pub struct NopSink;

/// A lazily-initialized static reference to the global `MetricsSink` implementation.
pub static SINK: OnceCell<&'static dyn MetricsSink> = OnceCell::new();
static NOP_SINK: NopSink = NopSink;

/// Returns a static reference to the configured cube-minting metrics sink.
pub fn cube_metrics() -> &'static dyn CubeMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured store metrics sink.
pub fn store_metrics() -> &'static dyn StoreMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured sync metrics sink.
pub fn sync_metrics() -> &'static dyn SyncMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured storage metrics sink.
pub fn storage_metrics() -> &'static dyn StorageMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

/// Returns a static reference to the configured error metrics sink.
pub fn error_metrics() -> &'static dyn ErrorMetricsSink {
    SINK.get().copied().unwrap_or(&NOP_SINK)
}

// --- Trait Definitions ---

/// Metrics for cube construction: hashcash mining and signature verification.
pub trait CubeMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of cubes successfully minted, labeled by kind ("frozen", "muc", "ipc").
    fn inc_mined(&self, kind: &str);
    /// Observes the wall-clock duration of a hashcash mining operation.
    fn observe_hashcash_duration(&self, duration_secs: f64);
    /// Increments the counter of cubes rejected during parsing/validation, labeled by reason.
    fn inc_rejected(&self, reason: &'static str);
}
impl CubeMetricsSink for NopSink {
    fn inc_mined(&self, _kind: &str) {}
    fn observe_hashcash_duration(&self, _duration_secs: f64) {}
    fn inc_rejected(&self, _reason: &'static str) {}
}

/// Metrics for the in-memory cube store and annotation engine.
pub trait StoreMetricsSink: Send + Sync + std::fmt::Debug {
    /// Sets the gauge for the total number of cubes currently held.
    fn set_cubes_total(&self, count: u64);
    /// Increments the counter of MUC contest replacements (a newer-signed version displacing an older one).
    fn inc_muc_contest_replacements(&self);
    /// Observes the duration of an annotation-propagation pass.
    fn observe_annotation_propagation(&self, duration_secs: f64);
}
impl StoreMetricsSink for NopSink {
    fn set_cubes_total(&self, _count: u64) {}
    fn inc_muc_contest_replacements(&self) {}
    fn observe_annotation_propagation(&self, _duration_secs: f64) {}
}

/// Metrics for the peer synchronization layer.
pub trait SyncMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the gauge for the current number of connected peers.
    fn inc_connected_peers(&self);
    /// Decrements the gauge for the current number of connected peers.
    fn dec_connected_peers(&self);
    /// Increments the counter of cubes sent to peers.
    fn inc_cubes_sent(&self);
    /// Increments the counter of cubes received from peers.
    fn inc_cubes_received(&self);
    /// Increments the counter of peers blacklisted for protocol violations.
    fn inc_peers_blacklisted(&self);
}
impl SyncMetricsSink for NopSink {
    fn inc_connected_peers(&self) {}
    fn dec_connected_peers(&self) {}
    fn inc_cubes_sent(&self) {}
    fn inc_cubes_received(&self) {}
    fn inc_peers_blacklisted(&self) {}
}

/// Metrics for the persistence (redb) backend.
pub trait StorageMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments the counter of bytes written to the backend.
    fn inc_bytes_written_total(&self, bytes: u64);
    /// Sets the gauge for estimated total disk usage.
    fn set_disk_usage_bytes(&self, bytes: u64);
    /// Increments the counter of failed persistence writes.
    fn inc_put_errors_total(&self);
    /// Observes the wall-clock duration of a single `put` commit to disk.
    fn observe_write_duration(&self, duration_secs: f64);
}
impl StorageMetricsSink for NopSink {
    fn inc_bytes_written_total(&self, _bytes: u64) {}
    fn set_disk_usage_bytes(&self, _bytes: u64) {}
    fn inc_put_errors_total(&self) {}
    fn observe_write_duration(&self, _duration_secs: f64) {}
}

/// A sink for recording structured error metrics.
pub trait ErrorMetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter for a specific error, categorized by its kind and variant.
    fn inc_error(&self, kind: &'static str, variant: &'static str);
}
impl ErrorMetricsSink for NopSink {
    fn inc_error(&self, _kind: &'static str, _variant: &'static str) {}
}

/// A unified sink that implements all domain-specific traits, providing a single
/// point of implementation for metrics backends like Prometheus.
pub trait MetricsSink:
    CubeMetricsSink + StoreMetricsSink + SyncMetricsSink + StorageMetricsSink + ErrorMetricsSink
{
}

// Blanket implementation to allow any type that implements all sub-traits
// to be used as a `MetricsSink`.
impl<T> MetricsSink for T where
    T: CubeMetricsSink + StoreMetricsSink + SyncMetricsSink + StorageMetricsSink + ErrorMetricsSink
{
}
