//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::Result;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Call once, before the
/// server starts; a second install fails.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Registered sessions (gauge).
pub const SESSIONS_ACTIVE: &str = "signaling_sessions_active";
/// Sessions admitted (counter).
pub const SESSIONS_OPENED_TOTAL: &str = "signaling_sessions_opened_total";
/// Sessions evicted by the hub (counter, labels: reason).
pub const SESSIONS_EVICTED_TOTAL: &str = "signaling_sessions_evicted_total";
/// Session lifetime (histogram).
pub const SESSION_DURATION_SECONDS: &str = "signaling_session_duration_seconds";
/// Connections refused at admission (counter, labels: reason).
pub const ADMISSION_FAILURES_TOTAL: &str = "signaling_admission_failures_total";
/// Envelopes delivered to a target queue (counter, labels: kind).
pub const ENVELOPES_ROUTED_TOTAL: &str = "signaling_envelopes_routed_total";
/// Envelopes dropped by the hub (counter, labels: reason).
pub const ENVELOPES_DROPPED_TOTAL: &str = "signaling_envelopes_dropped_total";
/// Envelopes refused with an error to the sender (counter, labels: kind).
pub const ENVELOPES_REJECTED_TOTAL: &str = "signaling_envelopes_rejected_total";
