use std::net::SocketAddr;

use crate::sql::{BookingFilter, Command};

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "sharebnb_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "sharebnb_query_duration_seconds";

/// Counter: finished booking requests. Labels: operation, stage.
pub const BOOKING_DECISIONS_TOTAL: &str = "sharebnb_booking_decisions_total";

/// Counter: property lock attempts that timed out.
pub const LOCK_TIMEOUTS_TOTAL: &str = "sharebnb_lock_timeouts_total";

// ── Resource metrics ────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "sharebnb_connections_active";
pub const CONNECTIONS_TOTAL: &str = "sharebnb_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "sharebnb_connections_rejected_total";

/// Histogram: group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "sharebnb_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "sharebnb_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProperty { .. } => "insert_property",
        Command::ChangeRate { .. } => "change_rate",
        Command::DeleteProperty { .. } => "delete_property",
        Command::InsertBooking { .. } => "insert_booking",
        Command::EditBooking { .. } => "edit_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectBookings(BookingFilter::Id(_)) => "select_booking",
        Command::SelectBookings(BookingFilter::Property(_)) => "select_property_bookings",
        Command::SelectBookings(BookingFilter::Customer(_)) => "select_customer_bookings",
        Command::SelectProperties { .. } => "select_properties",
    }
}
