use std::net::SocketAddr;

// ── Workflow metrics ─────────────────────────────────────────────

/// Counter: accepted operations. Labels: workflow, op.
pub const TRANSITIONS_TOTAL: &str = "officeflow_transitions_total";

/// Counter: refused operations. Labels: workflow, op, kind.
pub const REJECTIONS_TOTAL: &str = "officeflow_rejections_total";

/// Counter: booking attempts refused for an overlapping active booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "officeflow_booking_conflicts_total";

/// Counter: collects that found no unit left at commit time.
pub const COLLECT_UNAVAILABLE_TOTAL: &str = "officeflow_collect_unavailable_total";

/// Gauge: devices whose counters disagree with outstanding requests at the last audit.
pub const INVENTORY_DRIFT_DEVICES: &str = "officeflow_inventory_drift_devices";

// ── Journal metrics ──────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "officeflow_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "officeflow_wal_flush_batch_size";

/// Counter: completed journal compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "officeflow_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// An exporter that fails to bind is logged; the engine runs on without it.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}
