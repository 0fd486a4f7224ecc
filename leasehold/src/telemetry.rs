//! Tracing and telemetry instrumentation for leasehold.
//!
//! Span constructors and `record_*` helpers used by the lock. Every helper
//! emits a tracing event; with the `metrics` feature it also updates the
//! Prometheus metrics in [`crate::metrics`].

use std::time::Duration;

use tracing::{Span, info_span};

/// Create a tracing span for one acquisition.
///
/// # Arguments
/// * `resource` - The resource being locked
/// * `timeout` - The acquisition deadline
#[must_use]
pub fn lock_acquire_span(resource: impl AsRef<str>, timeout: Duration) -> Span {
    info_span!(
        "leasehold.acquire",
        resource = %resource.as_ref(),
        timeout_ms = timeout.as_millis() as u64,
    )
}

/// Create a tracing span for one release.
#[must_use]
pub fn lock_release_span(resource: impl AsRef<str>, lease_id: impl AsRef<str>) -> Span {
    info_span!(
        "leasehold.release",
        resource = %resource.as_ref(),
        lease_id = %lease_id.as_ref(),
    )
}

/// Record a successful acquisition and how long the caller waited.
pub fn record_lock_acquired(
    table_prefix: impl AsRef<str>,
    resource: impl AsRef<str>,
    waited: Duration,
    attempts: u32,
) {
    tracing::debug!(
        table_prefix = %table_prefix.as_ref(),
        resource = %resource.as_ref(),
        waited_ms = waited.as_millis() as u64,
        attempts,
        "lock acquired"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_lock_acquired(table_prefix.as_ref(), waited.as_secs_f64());
}

/// Record a failed acquisition.
///
/// # Arguments
/// * `reason` - One of `timeout`, `cancelled`, `zero_ttl`, `store`
pub fn record_lock_failed(
    table_prefix: impl AsRef<str>,
    resource: impl AsRef<str>,
    reason: impl AsRef<str>,
) {
    if reason.as_ref() == "cancelled" {
        tracing::debug!(
            table_prefix = %table_prefix.as_ref(),
            resource = %resource.as_ref(),
            "lock acquisition cancelled"
        );
    } else {
        tracing::warn!(
            table_prefix = %table_prefix.as_ref(),
            resource = %resource.as_ref(),
            reason = %reason.as_ref(),
            "lock acquisition failed"
        );
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_lock_failed(table_prefix.as_ref(), reason.as_ref());
}

/// Record a release. `deleted` is false when no matching row was found.
pub fn record_lock_released(
    table_prefix: impl AsRef<str>,
    resource: impl AsRef<str>,
    deleted: bool,
) {
    tracing::debug!(
        table_prefix = %table_prefix.as_ref(),
        resource = %resource.as_ref(),
        deleted,
        "lock released"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_lock_released(
        table_prefix.as_ref(),
        if deleted { "deleted" } else { "missing" },
    );
}
