use chrono::NaiveTime;
use ulid::Ulid;

/// Why the Booking Validator refused a proposed booking. Always recoverable
/// by resubmitting different data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidTimeRange,
    DurationMismatch {
        expected_minutes: u32,
        actual_minutes: i64,
    },
    /// `booking` is the existing booking that was hit, when known.
    Overlap { booking: Option<Ulid> },
    OutsideWorkday { open: NaiveTime, close: NaiveTime },
    TooCloseToPrevious { gap_minutes: i64, required: u32 },
    TooCloseToNext { gap_minutes: i64, required: u32 },
}

impl Rejection {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Rejection::InvalidTimeRange => "invalid_time_range",
            Rejection::DurationMismatch { .. } => "duration_mismatch",
            Rejection::Overlap { .. } => "overlap",
            Rejection::OutsideWorkday { .. } => "outside_workday",
            Rejection::TooCloseToPrevious { .. } => "too_close_to_previous",
            Rejection::TooCloseToNext { .. } => "too_close_to_next",
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::InvalidTimeRange => write!(f, "end time must be after start time"),
            Rejection::DurationMismatch {
                expected_minutes,
                actual_minutes,
            } => write!(
                f,
                "duration must match service: expected {expected_minutes} min, got {actual_minutes} min"
            ),
            Rejection::Overlap { booking: Some(id) } => {
                write!(f, "slot overlaps with existing booking {id}")
            }
            Rejection::Overlap { booking: None } => write!(f, "slot overlaps with existing booking"),
            Rejection::OutsideWorkday { open, close } => {
                write!(f, "outside workday hours ({} - {})", open.format("%H:%M"), close.format("%H:%M"))
            }
            Rejection::TooCloseToPrevious { gap_minutes, required } => write!(
                f,
                "too close to previous booking: {gap_minutes} min gap, {required} min required"
            ),
            Rejection::TooCloseToNext { gap_minutes, required } => write!(
                f,
                "too close to next booking: {gap_minutes} min gap, {required} min required"
            ),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    CenterNotFound(Ulid),
    ServiceNotFound(Ulid),
    BookingNotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidInput(String),
    LimitExceeded(&'static str),
    Rejected(Rejection),
}

impl EngineError {
    /// Unknown ids, malformed values and limit breaches: the caller's input
    /// was wrong before the engine ran.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, EngineError::Rejected(_))
    }
}

impl From<Rejection> for EngineError {
    fn from(r: Rejection) -> Self {
        EngineError::Rejected(r)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::CenterNotFound(id) => write!(f, "center not found: {id}"),
            EngineError::ServiceNotFound(id) => write!(f, "service not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Rejected(r) => write!(f, "booking rejected: {r}"),
        }
    }
}

impl std::error::Error for EngineError {}
