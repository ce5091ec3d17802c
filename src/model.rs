use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open interval `[start, end)` within a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// Build a range on `date` from two times of day.
    pub fn on(date: NaiveDate, start: NaiveTime, end: NaiveTime) -> Self {
        Self::new(date.and_time(start), date.and_time(end))
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Widen the range by `buffer` on both sides.
    pub fn expand(&self, buffer: TimeDelta) -> Self {
        Self {
            start: self.start - buffer,
            end: self.end + buffer,
        }
    }
}

/// A contiguous range of valid *start* times for a booking of a given
/// duration. `earliest_start == latest_start` is a single valid start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeWindow {
    pub earliest_start: NaiveDateTime,
    pub latest_start: NaiveDateTime,
}

impl FreeWindow {
    pub fn new(earliest_start: NaiveDateTime, latest_start: NaiveDateTime) -> Self {
        debug_assert!(earliest_start <= latest_start, "FreeWindow must not be inverted");
        Self {
            earliest_start,
            latest_start,
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Center {
    pub id: Ulid,
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    /// Routine service work (e.g. a 45 minute check).
    Service,
    /// Longer modification work (e.g. a 4 hour fit-out).
    Modification,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Service => "service",
            ServiceCategory::Modification => "modification",
        }
    }
}

impl FromStr for ServiceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "service" => Ok(ServiceCategory::Service),
            "modification" => Ok(ServiceCategory::Modification),
            other => Err(format!("unknown service category: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub category: ServiceCategory,
    pub duration_minutes: u32,
    pub price_cents: i64,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Booked,
    Cancelled,
    Pending,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Booked => "booked",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "booked" => Ok(BookingStatus::Booked),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "pending" => Ok(BookingStatus::Pending),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Which booking statuses occupy time on a center's calendar.
///
/// `Cancelled` never occupies; the set only decides whether `Pending`
/// bookings block other customers alongside `Booked` ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occupancy {
    pending: bool,
}

impl Occupancy {
    /// Only confirmed (`Booked`) records occupy time.
    pub const BOOKED_ONLY: Occupancy = Occupancy { pending: false };
    /// `Booked` and `Pending` records occupy time.
    pub const BOOKED_AND_PENDING: Occupancy = Occupancy { pending: true };

    pub fn occupies(&self, status: BookingStatus) -> bool {
        match status {
            BookingStatus::Booked => true,
            BookingStatus::Pending => self.pending,
            BookingStatus::Cancelled => false,
        }
    }
}

impl Default for Occupancy {
    fn default() -> Self {
        Occupancy::BOOKED_AND_PENDING
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    pub center_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub customer_name: String,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
}

impl BookingRecord {
    /// The busy period this booking covers (before buffer expansion).
    pub fn range(&self) -> TimeRange {
        TimeRange::on(self.date, self.start_time, self.end_time)
    }
}

/// A booking as submitted by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub center_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub customer_name: String,
    /// Defaults to `Booked` when absent.
    pub status: Option<BookingStatus>,
}

// ── Query result types ───────────────────────────────────────────

/// One concrete offered start/end pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Minutes left between the slot's end and workday close. Informational.
    pub gap_remaining_after_minutes: i64,
}

impl Slot {
    pub fn start_time(&self) -> NaiveTime {
        self.start.time()
    }

    pub fn end_time(&self) -> NaiveTime {
        self.end.time()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeDate {
    pub date: NaiveDate,
    pub slot_count: usize,
    pub earliest_start: NaiveTime,
}

/// Outcome of an availability query. An empty day is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Open {
        slots: Vec<Slot>,
    },
    Unavailable {
        message: String,
        suggested_dates: Vec<AlternativeDate>,
    },
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Open { .. })
    }
}
