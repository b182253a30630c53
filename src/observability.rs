use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "hallbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "hallbook_query_duration_seconds";

/// Counter: bookings refused because they would double-book a location.
pub const BOOKING_CONFLICTS_TOTAL: &str = "hallbook_booking_conflicts_total";

/// Counter: picker interactions. Labels: action, outcome.
pub const PICKER_ACTIONS_TOTAL: &str = "hallbook_picker_actions_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "hallbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "hallbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "hallbook_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "hallbook_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "hallbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "hallbook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "hallbook_wal_compactions_total";

/// Install the fmt subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init_metrics(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertLocation { .. } => "insert_location",
        Command::RenameLocation { .. } => "rename_location",
        Command::DeleteLocation { .. } => "delete_location",
        Command::SelectLocations => "select_locations",
        Command::InsertBooking { .. } => "insert_booking",
        Command::BatchInsertBookings { .. } => "batch_insert_bookings",
        Command::ImportDocument { .. } => "import_document",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectWeeklyGrid { .. } => "select_weekly_grid",
        Command::SelectGridConflicts { .. } => "select_grid_conflicts",
        Command::SelectSlots { .. } => "select_slots",
        Command::PickDate { .. } => "pick_date",
        Command::PickSlot { .. } => "pick_slot",
        Command::ConfirmPick => "confirm_pick",
        Command::ClearPick => "clear_pick",
    }
}
