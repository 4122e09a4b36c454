use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tablebook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tablebook_query_duration_seconds";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: reservations created. Labels: kind (customer, walk_in).
pub const BOOKINGS_TOTAL: &str = "tablebook_bookings_total";

/// Counter: claims rejected because the table was already taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "tablebook_booking_conflicts_total";

/// Counter: reservations marked as reminded by the sweep.
pub const REMINDERS_SENT_TOTAL: &str = "tablebook_reminders_sent_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tablebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tablebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tablebook_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablebook_wal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablebook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertLocation { .. } => "insert_location",
        Command::InsertOccasion { .. } => "insert_occasion",
        Command::InsertTable { .. } => "insert_table",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::InsertWalkIn { .. } => "insert_walk_in",
        Command::DeleteReservations { .. } => "delete_reservations",
        Command::SelectAvailableTables { .. } => "select_available_tables",
        Command::SelectBusyTables { .. } => "select_busy_tables",
        Command::SelectSlots => "select_slots",
        Command::SelectLocations { .. } => "select_locations",
        Command::SelectOccasions { .. } => "select_occasions",
        Command::SelectUserReservations { .. } => "select_user_reservations",
    }
}
