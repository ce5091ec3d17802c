use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::BookingRecord;

/// Downstream system that receives pending bookings.
#[async_trait]
pub trait BookingSink: Send + Sync {
    async fn forward(&self, record: &BookingRecord) -> Result<(), ForwardError>;
}

/// Writes each forwarded booking as a JSON log line.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl BookingSink for LogSink {
    async fn forward(&self, record: &BookingRecord) -> Result<(), ForwardError> {
        let json = serde_json::to_string(record).map_err(|e| ForwardError::Sink(e.to_string()))?;
        info!(target: "centerbook::forward", "{json}");
        Ok(())
    }
}

#[derive(Debug)]
pub enum ForwardError {
    Sink(String),
    Timeout(Duration),
    /// Forwarded, but the booking could not be promoted afterwards.
    Confirm(EngineError),
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Sink(msg) => write!(f, "sink error: {msg}"),
            ForwardError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
            ForwardError::Confirm(e) => write!(f, "confirm failed: {e}"),
        }
    }
}

impl std::error::Error for ForwardError {}

/// Result of forwarding one booking.
#[derive(Debug)]
pub struct ForwardOutcome {
    pub booking_id: Ulid,
    pub result: Result<(), ForwardError>,
}

impl ForwardOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Forward every pending booking once. A failure is recorded for that
/// booking and the rest of the batch still runs. Forwarded bookings are
/// confirmed, or cancelled when they were overtaken, so later passes skip
/// them.
pub async fn forward_pending(engine: &Engine, sink: &dyn BookingSink, timeout: Duration) -> Vec<ForwardOutcome> {
    let pending = engine.pending_bookings();
    let mut outcomes = Vec::with_capacity(pending.len());

    for record in pending {
        let result = match tokio::time::timeout(timeout, sink.forward(&record)).await {
            Err(_) => Err(ForwardError::Timeout(timeout)),
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => match engine.confirm_booking(record.id).await {
                Ok(_) => Ok(()),
                Err(e @ EngineError::Rejected(_)) => {
                    retire_overtaken(engine, record.id, &e).await;
                    Err(ForwardError::Confirm(e))
                }
                Err(e) => Err(ForwardError::Confirm(e)),
            },
        };

        let label = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(crate::observability::FORWARD_TOTAL, "result" => label).increment(1);
        match &result {
            Ok(()) => debug!("forwarded booking {}", record.id),
            Err(e) => warn!("forwarding booking {} failed: {e}", record.id),
        }
        outcomes.push(ForwardOutcome {
            booking_id: record.id,
            result,
        });
    }
    outcomes
}

/// A delivered booking that lost its slot while pending is cancelled, so it
/// drops out of `pending_bookings` and is not delivered again.
async fn retire_overtaken(engine: &Engine, id: Ulid, reason: &EngineError) {
    match engine.cancel_booking(id).await {
        Ok(_) => warn!("booking {id} delivered but could not be confirmed ({reason}), cancelled"),
        Err(e) => warn!("booking {id} delivered but could not be confirmed or cancelled: {e}"),
    }
}

/// Background task that periodically forwards pending bookings.
pub async fn run_forwarder(engine: Arc<Engine>, sink: Arc<dyn BookingSink>, interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let started = Instant::now();
        let outcomes = forward_pending(&engine, sink.as_ref(), timeout).await;
        metrics::histogram!(crate::observability::FORWARD_PASS_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        if !outcomes.is_empty() {
            let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
            info!("forwarded {} pending bookings, {failed} failed", outcomes.len() - failed);
        }
    }
}
