//! Metrics collection for `craftwatch`.
//!
//! Prometheus-compatible counters for tick cadence, probe health, and
//! notification delivery. The recorder is only installed when requested;
//! without it every `metrics` macro call is a silent no-op.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::CraftwatchError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint (metrics are recorded internally only).
///
/// # Errors
///
/// Returns `CraftwatchError::Io` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), CraftwatchError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| CraftwatchError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!("craftwatch_ticks_total", "Total number of poll ticks run");
    describe_counter!(
        "craftwatch_probe_failures_total",
        "Freshness probe failures (throttled attempts included)"
    );
    describe_counter!(
        "craftwatch_query_failures_total",
        "Roster query failures (timeouts and malformed replies included)"
    );
    describe_counter!(
        "craftwatch_transitions_total",
        "Status transitions by target status"
    );
    describe_counter!(
        "craftwatch_notifications_total",
        "Notification messages posted by kind"
    );
    describe_counter!(
        "craftwatch_notify_failures_total",
        "Notification posts that failed and were dropped"
    );
}

/// Records one completed poll tick.
pub fn record_tick() {
    counter!("craftwatch_ticks_total").increment(1);
}

/// Records a freshness probe failure.
pub fn record_probe_failure() {
    counter!("craftwatch_probe_failures_total").increment(1);
}

/// Records a roster query failure.
pub fn record_query_failure() {
    counter!("craftwatch_query_failures_total").increment(1);
}

/// Records a status transition into `to`.
pub fn record_transition(to: &str) {
    counter!("craftwatch_transitions_total", "to" => to.to_owned()).increment(1);
}

/// Records a posted notification by kind (`"status"`, `"join"`, `"leave"`).
pub fn record_notification(kind: &'static str) {
    counter!("craftwatch_notifications_total", "kind" => kind).increment(1);
}

/// Records a dropped notification.
pub fn record_notify_failure() {
    counter!("craftwatch_notify_failures_total").increment(1);
}
