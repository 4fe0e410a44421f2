use std::net::SocketAddr;

use tracing::warn;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome (accepted, overridden, rejected).
pub const RESERVATIONS_TOTAL: &str = "roombook_reservations_total";

/// Counter: reservations soft-deleted by a higher-priority booking.
pub const DISPLACED_TOTAL: &str = "roombook_displaced_total";

/// Counter: reservations soft-deleted by the expiry sweep.
pub const SWEEP_EXPIRED_TOTAL: &str = "roombook_sweep_expired_total";

/// Counter: reservations hard-removed by the daily reset.
pub const RESET_PURGED_TOTAL: &str = "roombook_reset_purged_total";

/// Counter: console commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "roombook_commands_total";

// ── State ───────────────────────────────────────────────────────

/// Gauge: rooms currently registered.
pub const ROOMS_ACTIVE: &str = "roombook_rooms_active";

/// Counter: failed logins.
pub const AUTH_FAILURES_TOTAL: &str = "roombook_auth_failures_total";

// ── Persistence ─────────────────────────────────────────────────

/// Counter: snapshot writes that failed; memory stayed authoritative.
pub const PERSIST_FAILURES_TOTAL: &str = "roombook_persist_failures_total";

/// Histogram: room snapshot write duration in seconds.
pub const PERSIST_DURATION_SECONDS: &str = "roombook_persist_duration_seconds";

/// Histogram: group-commit batch size (requests per snapshot write).
pub const PERSIST_BATCH_SIZE: &str = "roombook_persist_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => warn!("metrics exporter not installed: {e}"),
    }
}
