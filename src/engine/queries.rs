use chrono::{Local, NaiveDate, TimeDelta};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::alternatives::{horizon, rank_alternatives};
use super::availability;
use super::slots::generate_slots;
use super::{Engine, EngineError};

pub const NO_SLOTS_MESSAGE: &str = "No slots available on this date.";

impl Engine {
    fn check_duration(duration_minutes: u32) -> Result<TimeDelta, EngineError> {
        if duration_minutes == 0 {
            return Err(EngineError::InvalidInput("duration must be positive".into()));
        }
        if duration_minutes > MAX_DURATION_MINUTES {
            return Err(EngineError::LimitExceeded("duration too long"));
        }
        Ok(TimeDelta::minutes(i64::from(duration_minutes)))
    }

    /// Busy periods of `center_id` on `date` under the configured occupancy.
    fn busy_on(&self, center_id: Ulid, date: NaiveDate) -> Vec<TimeRange> {
        self.store
            .bookings_on(center_id, date, self.config.occupancy)
            .iter()
            .filter(|b| b.start_time < b.end_time)
            .map(BookingRecord::range)
            .collect()
    }

    /// Windows of valid start times on `date` for a booking of `duration_minutes`.
    pub fn free_windows(
        &self,
        center_id: Ulid,
        date: NaiveDate,
        duration_minutes: u32,
    ) -> Result<Vec<FreeWindow>, EngineError> {
        let duration = Self::check_duration(duration_minutes)?;
        self.require_center(center_id)?;
        let busy = self.busy_on(center_id, date);
        Ok(availability::free_windows(
            &self.config.workday.on(date),
            &busy,
            duration,
            self.config.buffer(),
        ))
    }

    /// Offerable slots on `date`, earliest first, at most `max_slots`.
    pub fn slots(&self, center_id: Ulid, date: NaiveDate, duration_minutes: u32) -> Result<Vec<Slot>, EngineError> {
        let windows = self.free_windows(center_id, date, duration_minutes)?;
        Ok(generate_slots(
            &windows,
            duration_minutes,
            self.config.workday.close_on(date),
            self.config.max_slots,
        ))
    }

    pub fn get_availability(
        &self,
        center_id: Ulid,
        date: NaiveDate,
        service_id: Ulid,
    ) -> Result<Availability, EngineError> {
        self.availability_as_of(center_id, date, service_id, Local::now().date_naive())
    }

    /// Availability for `date`; alternatives are searched in the days after `today`.
    pub fn availability_as_of(
        &self,
        center_id: Ulid,
        date: NaiveDate,
        service_id: Ulid,
        today: NaiveDate,
    ) -> Result<Availability, EngineError> {
        let service = self.require_service(service_id)?;
        let mut slots = self.slots(center_id, date, service.duration_minutes)?;
        metrics::histogram!(crate::observability::SLOTS_GENERATED).record(slots.len() as f64);

        if !slots.is_empty() {
            slots.truncate(self.config.shortlist_len);
            metrics::counter!(crate::observability::AVAILABILITY_QUERIES_TOTAL, "outcome" => "open")
                .increment(1);
            return Ok(Availability::Open { slots });
        }

        let suggested_dates = self.suggest_alternatives(center_id, service_id, today)?;
        debug!(
            "no slots for center {center_id} on {date}, {} alternatives",
            suggested_dates.len()
        );
        metrics::counter!(crate::observability::AVAILABILITY_QUERIES_TOTAL, "outcome" => "unavailable")
            .increment(1);
        Ok(Availability::Unavailable {
            message: NO_SLOTS_MESSAGE.to_string(),
            suggested_dates,
        })
    }

    /// Up to `max_suggestions` dates in the horizon after `today`, most slots first.
    pub fn suggest_alternatives(
        &self,
        center_id: Ulid,
        service_id: Ulid,
        today: NaiveDate,
    ) -> Result<Vec<AlternativeDate>, EngineError> {
        let service = self.require_service(service_id)?;
        let mut candidates = Vec::with_capacity(self.config.horizon_days as usize);
        for date in horizon(today, self.config.horizon_days) {
            candidates.push((date, self.slots(center_id, date, service.duration_minutes)?));
        }
        Ok(rank_alternatives(&candidates, self.config.max_suggestions))
    }

    /// Every booking of a center on a date, cancelled ones included.
    pub fn list_bookings(&self, center_id: Ulid, date: NaiveDate) -> Result<Vec<BookingRecord>, EngineError> {
        self.require_center(center_id)?;
        Ok(self.store.all_bookings_on(center_id, date))
    }

    pub fn get_booking(&self, id: Ulid) -> Result<BookingRecord, EngineError> {
        self.store.get_booking(&id).ok_or(EngineError::BookingNotFound(id))
    }

    pub fn list_centers(&self) -> Vec<Center> {
        self.store.centers()
    }

    pub fn list_services(&self) -> Vec<Service> {
        self.store.services()
    }

    /// Bookings waiting to be forwarded, oldest first.
    pub fn pending_bookings(&self) -> Vec<BookingRecord> {
        self.store.bookings_with_status(BookingStatus::Pending)
    }
}
