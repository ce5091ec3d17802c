use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "centerbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "centerbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "centerbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "centerbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "centerbook_connections_rejected_total";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: availability queries. Labels: outcome (open, unavailable).
pub const AVAILABILITY_QUERIES_TOTAL: &str = "centerbook_availability_queries_total";

/// Histogram: slots generated for one date before the shortlist cut.
pub const SLOTS_GENERATED: &str = "centerbook_slots_generated";

/// Counter: bookings accepted. Labels: status.
pub const BOOKINGS_CREATED_TOTAL: &str = "centerbook_bookings_created_total";

/// Counter: bookings refused by the validator. Labels: reason.
pub const BOOKINGS_REJECTED_TOTAL: &str = "centerbook_bookings_rejected_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "centerbook_bookings_cancelled_total";

/// Counter: pending bookings handed to the downstream sink. Labels: result.
pub const FORWARD_TOTAL: &str = "centerbook_forward_total";

/// Histogram: one forwarding pass in seconds.
pub const FORWARD_PASS_DURATION_SECONDS: &str = "centerbook_forward_pass_duration_seconds";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCenter { .. } => "insert_center",
        Command::InsertService { .. } => "insert_service",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectCenters => "select_centers",
        Command::SelectServices => "select_services",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectPending => "select_pending",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
