use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "zakazi_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "zakazi_query_duration_seconds";

/// Counter: reservations booked.
pub const RESERVATIONS_BOOKED_TOTAL: &str = "zakazi_reservations_booked_total";

/// Counter: reservations cancelled (explicitly, not by the sweep).
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "zakazi_reservations_cancelled_total";

/// Counter: booking attempts that lost the slot race.
pub const SLOT_CONFLICTS_TOTAL: &str = "zakazi_slot_conflicts_total";

/// Counter: reservations deleted by the retention sweep.
pub const SWEEP_DELETED_TOTAL: &str = "zakazi_sweep_deleted_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "zakazi_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "zakazi_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "zakazi_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "zakazi_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "zakazi_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if
/// `port` is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertReservation { .. } => "insert_reservation",
        Command::MoveReservation { .. } => "move_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::InsertService { .. } => "insert_service",
        Command::DeleteService { .. } => "delete_service",
        Command::SelectServices => "select_services",
        Command::UpdateWorkingHours { .. } => "update_working_hours",
        Command::SelectWorkingHours => "select_working_hours",
        Command::Listen { .. } => "listen",
    }
}
