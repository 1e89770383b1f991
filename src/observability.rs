use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "staffslot_http_requests_total";

/// Counter: booking attempts. Labels: outcome (`confirmed` or an error code).
pub const BOOKINGS_TOTAL: &str = "staffslot_bookings_total";

/// Histogram: time to decide a booking, in seconds.
pub const BOOKING_DURATION_SECONDS: &str = "staffslot_booking_duration_seconds";

/// Counter: availability snapshots computed.
pub const SNAPSHOTS_TOTAL: &str = "staffslot_snapshots_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: bucket lock waits that hit the bound and answered `Busy`.
pub const LOCK_TIMEOUTS_TOTAL: &str = "staffslot_lock_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staffslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staffslot_wal_flush_batch_size";

/// Counter: journal compactions completed.
pub const COMPACTIONS_TOTAL: &str = "staffslot_compactions_total";

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
