//! Prometheus metrics instrumentation for leasehold.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `leasehold_lock_acquired_total` - Leases successfully acquired
//! - `leasehold_lock_failed_total` - Failed acquisitions, by reason
//! - `leasehold_lock_released_total` - Releases, by whether a row was deleted
//!
//! ## Histograms
//! - `leasehold_lock_wait_seconds` - Time from acquire call to held lease
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, HistogramVec, Opts, Registry, exponential_buckets};
use std::sync::LazyLock;

/// Global Prometheus registry for leasehold metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for acquired leases.
///
/// Labels:
/// - `table_prefix`: The lease table prefix
pub static LOCK_ACQUIRED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("leasehold_lock_acquired_total", "Total number of leases acquired");
    CounterVec::new(opts, &["table_prefix"])
        .expect("leasehold_lock_acquired_total metric creation failed")
});

/// Counter for failed acquisitions.
///
/// Labels:
/// - `table_prefix`: The lease table prefix
/// - `reason`: timeout, cancelled, zero_ttl or store
pub static LOCK_FAILED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "leasehold_lock_failed_total",
        "Total number of failed lease acquisitions",
    );
    CounterVec::new(opts, &["table_prefix", "reason"])
        .expect("leasehold_lock_failed_total metric creation failed")
});

/// Counter for releases.
///
/// Labels:
/// - `table_prefix`: The lease table prefix
/// - `outcome`: deleted or missing
pub static LOCK_RELEASED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("leasehold_lock_released_total", "Total number of lease releases");
    CounterVec::new(opts, &["table_prefix", "outcome"])
        .expect("leasehold_lock_released_total metric creation failed")
});

/// Histogram for acquisition wait time in seconds.
pub static LOCK_WAIT_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "leasehold_lock_wait_seconds",
        "Time spent waiting for a lease in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["table_prefix"])
        .expect("leasehold_lock_wait_seconds metric creation failed")
});

/// Initialize all metrics by registering them with the global registry.
///
/// Calling it more than once is harmless.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(LOCK_ACQUIRED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(LOCK_FAILED_TOTAL.clone()),
        Box::new(LOCK_RELEASED_TOTAL.clone()),
        Box::new(LOCK_WAIT_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_lock_acquired(table_prefix: &str, wait_secs: f64) {
    LOCK_ACQUIRED_TOTAL.with_label_values(&[table_prefix]).inc();
    LOCK_WAIT_SECONDS
        .with_label_values(&[table_prefix])
        .observe(wait_secs);
}

pub fn record_lock_failed(table_prefix: &str, reason: &str) {
    LOCK_FAILED_TOTAL
        .with_label_values(&[table_prefix, reason])
        .inc();
}

pub fn record_lock_released(table_prefix: &str, outcome: &str) {
    LOCK_RELEASED_TOTAL
        .with_label_values(&[table_prefix, outcome])
        .inc();
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
