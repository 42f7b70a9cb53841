//! Prometheus Metrics Module
//!
//! Exposes bridge metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Trades**: admissions, duplicate suppressions, forwards, drops
//! - **Closes**: dispatches, stale-close gating, close notifications
//! - **Queue**: current depth and queue-full rejections
//! - **Streams**: connected stream counts
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "bridge_trades_admitted_total",
        "Trade events admitted to the outbound queue"
    );
    describe_counter!(
        "bridge_duplicates_suppressed_total",
        "Trade submissions dropped by duplicate-id suppression"
    );
    describe_counter!(
        "bridge_trades_forwarded_total",
        "Trade events forwarded to executor streams"
    );
    describe_counter!(
        "bridge_closes_dispatched_total",
        "CLOSE_HEDGE requests dispatched with an allocated ticket"
    );
    describe_counter!(
        "bridge_stale_closes_dropped_total",
        "CLOSE_HEDGE events dropped because the ticket was recently closed"
    );
    describe_counter!(
        "bridge_close_notifications_total",
        "Executor close notifications fanned out to upstream streams"
    );
    describe_counter!(
        "bridge_stream_drops_total",
        "Events dropped because a stream buffer was full"
    );
    describe_counter!(
        "bridge_queue_full_total",
        "Submissions rejected by queue admission control"
    );
    describe_gauge!("bridge_queue_depth", "Current outbound trade queue depth");
}

// =============================================================================
// Tests
// =============================================================================
