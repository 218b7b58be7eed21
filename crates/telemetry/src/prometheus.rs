// Path: crates/telemetry/src/prometheus.rs
//! A concrete implementation of the metrics sinks using the Prometheus crate.

use crate::sinks::*;
use once_cell::sync::OnceCell;
use prometheus::{
    exponential_buckets, register_gauge, register_histogram, register_int_counter,
    register_int_counter_vec, Gauge, Histogram, IntCounter, IntCounterVec,
};

// --- Metric Statics ---
// We use OnceCell to hold the metric collectors. They will be initialized
// exactly once by the `install` function.

static CUBE_MINED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static CUBE_REJECTED_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();
static HASHCASH_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();

static STORE_CUBES_TOTAL: OnceCell<Gauge> = OnceCell::new();
static STORE_MUC_REPLACEMENTS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static STORE_ANNOTATION_PROPAGATION_SECONDS: OnceCell<Histogram> = OnceCell::new();

static SYNC_CONNECTED_PEERS: OnceCell<Gauge> = OnceCell::new();
static SYNC_CUBES_SENT_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static SYNC_CUBES_RECEIVED_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static SYNC_PEERS_BLACKLISTED_TOTAL: OnceCell<IntCounter> = OnceCell::new();

static STORAGE_BYTES_WRITTEN_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static STORAGE_DISK_USAGE_BYTES: OnceCell<Gauge> = OnceCell::new();
static STORAGE_PUT_ERRORS_TOTAL: OnceCell<IntCounter> = OnceCell::new();
static STORAGE_WRITE_DURATION_SECONDS: OnceCell<Histogram> = OnceCell::new();

static ERRORS_TOTAL: OnceCell<IntCounterVec> = OnceCell::new();

#[derive(Debug, Clone, Copy)]
pub struct PrometheusSink;

/// Helper macro to reduce boilerplate for getting a metric from OnceCell.
/// This will panic if `install()` has not been called, which is intentional
/// as it indicates a critical application setup error.
macro_rules! get_metric {
    ($metric:ident) => {
        $metric
            .get()
            .expect("Prometheus sink not initialized. Call telemetry::prometheus::install() first.")
    };
}

impl CubeMetricsSink for PrometheusSink {
    fn inc_mined(&self, kind: &str) {
        get_metric!(CUBE_MINED_TOTAL).with_label_values(&[kind]).inc();
    }
    fn observe_hashcash_duration(&self, duration_secs: f64) {
        get_metric!(HASHCASH_DURATION_SECONDS).observe(duration_secs);
    }
    fn inc_rejected(&self, reason: &'static str) {
        get_metric!(CUBE_REJECTED_TOTAL).with_label_values(&[reason]).inc();
    }
}

impl StoreMetricsSink for PrometheusSink {
    fn set_cubes_total(&self, count: u64) {
        get_metric!(STORE_CUBES_TOTAL).set(count as f64);
    }
    fn inc_muc_contest_replacements(&self) {
        get_metric!(STORE_MUC_REPLACEMENTS_TOTAL).inc();
    }
    fn observe_annotation_propagation(&self, duration_secs: f64) {
        get_metric!(STORE_ANNOTATION_PROPAGATION_SECONDS).observe(duration_secs);
    }
}

impl SyncMetricsSink for PrometheusSink {
    fn inc_connected_peers(&self) {
        get_metric!(SYNC_CONNECTED_PEERS).inc();
    }
    fn dec_connected_peers(&self) {
        get_metric!(SYNC_CONNECTED_PEERS).dec();
    }
    fn inc_cubes_sent(&self) {
        get_metric!(SYNC_CUBES_SENT_TOTAL).inc();
    }
    fn inc_cubes_received(&self) {
        get_metric!(SYNC_CUBES_RECEIVED_TOTAL).inc();
    }
    fn inc_peers_blacklisted(&self) {
        get_metric!(SYNC_PEERS_BLACKLISTED_TOTAL).inc();
    }
}

impl StorageMetricsSink for PrometheusSink {
    fn inc_bytes_written_total(&self, bytes: u64) {
        get_metric!(STORAGE_BYTES_WRITTEN_TOTAL).inc_by(bytes);
    }
    fn set_disk_usage_bytes(&self, bytes: u64) {
        get_metric!(STORAGE_DISK_USAGE_BYTES).set(bytes as f64);
    }
    fn inc_put_errors_total(&self) {
        get_metric!(STORAGE_PUT_ERRORS_TOTAL).inc();
    }
    fn observe_write_duration(&self, duration_secs: f64) {
        get_metric!(STORAGE_WRITE_DURATION_SECONDS).observe(duration_secs);
    }
}

impl ErrorMetricsSink for PrometheusSink {
    fn inc_error(&self, kind: &'static str, variant: &'static str) {
        get_metric!(ERRORS_TOTAL)
            .with_label_values(&[kind, variant])
            .inc();
    }
}

/// Initializes all Prometheus metrics collectors and returns a static reference to the sink.
/// This function must be called only once at application startup.
#[allow(clippy::expect_used)]
pub fn install() -> Result<&'static dyn MetricsSink, prometheus::Error> {
    CUBE_MINED_TOTAL
        .set(register_int_counter_vec!(
            "verity_cube_mined_total",
            "Total number of cubes successfully minted, by kind.",
            &["kind"]
        )?)
        .expect("static already initialized");
    CUBE_REJECTED_TOTAL
        .set(register_int_counter_vec!(
            "verity_cube_rejected_total",
            "Total number of cubes rejected during parsing or validation, by reason.",
            &["reason"]
        )?)
        .expect("static already initialized");
    HASHCASH_DURATION_SECONDS
        .set(register_histogram!(
            "verity_hashcash_duration_seconds",
            "Wall-clock duration of a hashcash mining operation.",
            exponential_buckets(0.001, 2.0, 20)?
        )?)
        .expect("static already initialized");

    STORE_CUBES_TOTAL
        .set(register_gauge!(
            "verity_store_cubes_total",
            "Current number of cubes held in the store."
        )?)
        .expect("static already initialized");
    STORE_MUC_REPLACEMENTS_TOTAL
        .set(register_int_counter!(
            "verity_store_muc_replacements_total",
            "Total number of MUC contest replacements (newer signed version displacing an older one)."
        )?)
        .expect("static already initialized");
    STORE_ANNOTATION_PROPAGATION_SECONDS
        .set(register_histogram!(
            "verity_store_annotation_propagation_seconds",
            "Duration of an annotation-propagation pass.",
            exponential_buckets(0.0001, 2.0, 18)?
        )?)
        .expect("static already initialized");

    SYNC_CONNECTED_PEERS
        .set(register_gauge!(
            "verity_sync_connected_peers",
            "Current number of connected sync peers."
        )?)
        .expect("static already initialized");
    SYNC_CUBES_SENT_TOTAL
        .set(register_int_counter!(
            "verity_sync_cubes_sent_total",
            "Total number of cubes sent to peers."
        )?)
        .expect("static already initialized");
    SYNC_CUBES_RECEIVED_TOTAL
        .set(register_int_counter!(
            "verity_sync_cubes_received_total",
            "Total number of cubes received from peers."
        )?)
        .expect("static already initialized");
    SYNC_PEERS_BLACKLISTED_TOTAL
        .set(register_int_counter!(
            "verity_sync_peers_blacklisted_total",
            "Total number of peers blacklisted for protocol violations."
        )?)
        .expect("static already initialized");

    STORAGE_BYTES_WRITTEN_TOTAL
        .set(register_int_counter!(
            "verity_storage_bytes_written_total",
            "Total bytes written to the persistence backend."
        )?)
        .expect("static already initialized");
    STORAGE_DISK_USAGE_BYTES
        .set(register_gauge!(
            "verity_storage_disk_usage_bytes",
            "Estimated total disk usage of the persistence backend."
        )?)
        .expect("static already initialized");
    STORAGE_PUT_ERRORS_TOTAL
        .set(register_int_counter!(
            "verity_storage_put_errors_total",
            "Total number of failed persistence writes."
        )?)
        .expect("static already initialized");
    STORAGE_WRITE_DURATION_SECONDS
        .set(register_histogram!(
            "verity_storage_write_duration_seconds",
            "Wall-clock duration of a single persistence commit to disk.",
            exponential_buckets(0.0001, 2.0, 18)?
        )?)
        .expect("static already initialized");

    ERRORS_TOTAL
        .set(register_int_counter_vec!(
            "verity_errors_total",
            "Total number of errors, categorized by kind and variant.",
            &["kind", "variant"]
        )?)
        .expect("static already initialized");

    static SINK: PrometheusSink = PrometheusSink;
    Ok(&SINK)
}
