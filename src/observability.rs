use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total HTTP requests handled. Labels: route, status.
pub const REQUESTS_TOTAL: &str = "openslot_requests_total";

/// Histogram: request latency in seconds. Labels: route.
pub const REQUEST_DURATION_SECONDS: &str = "openslot_request_duration_seconds";

/// Counter: appointment placement attempts. Labels: outcome
/// (committed, conflict, outside, exceeds_hours, stale).
pub const PLACEMENTS_TOTAL: &str = "openslot_placements_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: free-slot snapshots currently held for placement validation.
pub const SNAPSHOTS_ACTIVE: &str = "openslot_snapshots_active";

/// Counter: snapshots dropped by the reaper after the staleness TTL.
pub const SNAPSHOTS_REAPED_TOTAL: &str = "openslot_snapshots_reaped_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "openslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "openslot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
