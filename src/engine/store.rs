use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

/// Where centers, services and bookings live. The engine only ever reads
/// bookings through a `(center, date, occupancy)` query.
pub trait BookingStore: Send + Sync {
    fn insert_center(&self, center: Center) -> Result<(), StoreError>;
    fn get_center(&self, id: &Ulid) -> Option<Center>;
    fn centers(&self) -> Vec<Center>;

    fn center_count(&self) -> usize {
        self.centers().len()
    }

    fn insert_service(&self, service: Service) -> Result<(), StoreError>;
    fn get_service(&self, id: &Ulid) -> Option<Service>;
    fn services(&self) -> Vec<Service>;

    fn service_count(&self) -> usize {
        self.services().len()
    }

    /// Bookings of `center_id` on `date` whose status `occupancy` counts,
    /// ordered by start time.
    fn bookings_on(&self, center_id: Ulid, date: NaiveDate, occupancy: Occupancy) -> Vec<BookingRecord>;

    /// Every booking of `center_id` on `date` regardless of status, ordered
    /// by start time.
    fn all_bookings_on(&self, center_id: Ulid, date: NaiveDate) -> Vec<BookingRecord>;

    /// Insert a booking. No two non-cancelled bookings may share
    /// `(center, date, start_time, end_time)`.
    fn insert_booking(&self, record: BookingRecord) -> Result<(), StoreError>;

    fn get_booking(&self, id: &Ulid) -> Option<BookingRecord>;

    /// Change a booking's status, returning the updated record.
    fn set_status(&self, id: &Ulid, status: BookingStatus) -> Result<BookingRecord, StoreError>;

    fn bookings_with_status(&self, status: BookingStatus) -> Vec<BookingRecord>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    AlreadyExists(Ulid),
    NotFound(Ulid),
    /// Uniqueness violation on `(center, date, start_time, end_time)`.
    Duplicate {
        existing: Ulid,
        center_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StoreError::NotFound(id) => write!(f, "not found: {id}"),
            StoreError::Duplicate {
                existing,
                center_id,
                date,
                start_time,
                end_time,
            } => write!(
                f,
                "duplicate booking for center {center_id} on {date} {start_time}-{end_time} (existing {existing})"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

type DayKey = (Ulid, NaiveDate);

pub struct InMemoryStore {
    centers: DashMap<Ulid, Center>,
    services: DashMap<Ulid, Service>,
    /// All bookings of one center-day, sorted by `start_time`.
    days: DashMap<DayKey, Vec<BookingRecord>>,
    /// Reverse lookup: booking id → center-day.
    booking_to_day: DashMap<Ulid, DayKey>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            centers: DashMap::new(),
            services: DashMap::new(),
            days: DashMap::new(),
            booking_to_day: DashMap::new(),
        }
    }
}

impl BookingStore for InMemoryStore {
    // ── Catalog ──────────────────────────────────────────────

    fn insert_center(&self, center: Center) -> Result<(), StoreError> {
        match self.centers.entry(center.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(center.id)),
            Entry::Vacant(slot) => {
                slot.insert(center);
                Ok(())
            }
        }
    }

    fn center_count(&self) -> usize {
        self.centers.len()
    }

    fn get_center(&self, id: &Ulid) -> Option<Center> {
        self.centers.get(id).map(|e| e.value().clone())
    }

    fn centers(&self) -> Vec<Center> {
        let mut all: Vec<Center> = self.centers.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|c| c.id);
        all
    }

    fn insert_service(&self, service: Service) -> Result<(), StoreError> {
        match self.services.entry(service.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(service.id)),
            Entry::Vacant(slot) => {
                slot.insert(service);
                Ok(())
            }
        }
    }

    fn service_count(&self) -> usize {
        self.services.len()
    }

    fn get_service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    fn services(&self) -> Vec<Service> {
        let mut all: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    // ── Bookings ─────────────────────────────────────────────

    fn bookings_on(&self, center_id: Ulid, date: NaiveDate, occupancy: Occupancy) -> Vec<BookingRecord> {
        self.days
            .get(&(center_id, date))
            .map(|day| {
                day.iter()
                    .filter(|b| occupancy.occupies(b.status))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn all_bookings_on(&self, center_id: Ulid, date: NaiveDate) -> Vec<BookingRecord> {
        self.days
            .get(&(center_id, date))
            .map(|day| day.value().clone())
            .unwrap_or_default()
    }

    fn insert_booking(&self, record: BookingRecord) -> Result<(), StoreError> {
        // Lock order: id index, then day.
        let id_slot = match self.booking_to_day.entry(record.id) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(record.id)),
            Entry::Vacant(slot) => slot,
        };
        let key = (record.center_id, record.date);
        let mut day = self.days.entry(key).or_default();

        if let Some(existing) = day.iter().find(|b| {
            b.status != BookingStatus::Cancelled
                && b.start_time == record.start_time
                && b.end_time == record.end_time
        }) {
            return Err(StoreError::Duplicate {
                existing: existing.id,
                center_id: record.center_id,
                date: record.date,
                start_time: record.start_time,
                end_time: record.end_time,
            });
        }

        let pos = day.partition_point(|b| b.start_time <= record.start_time);
        day.insert(pos, record);
        id_slot.insert(key);
        Ok(())
    }

    fn get_booking(&self, id: &Ulid) -> Option<BookingRecord> {
        let key = *self.booking_to_day.get(id)?.value();
        let day = self.days.get(&key)?;
        day.iter().find(|b| b.id == *id).cloned()
    }

    fn set_status(&self, id: &Ulid, status: BookingStatus) -> Result<BookingRecord, StoreError> {
        let key = self
            .booking_to_day
            .get(id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(*id))?;
        let mut day = self.days.get_mut(&key).ok_or(StoreError::NotFound(*id))?;

        if status != BookingStatus::Cancelled {
            let target = day.iter().find(|b| b.id == *id).ok_or(StoreError::NotFound(*id))?;
            let (start, end) = (target.start_time, target.end_time);
            if let Some(clash) = day.iter().find(|b| {
                b.id != *id && b.status != BookingStatus::Cancelled && b.start_time == start && b.end_time == end
            }) {
                return Err(StoreError::Duplicate {
                    existing: clash.id,
                    center_id: key.0,
                    date: key.1,
                    start_time: start,
                    end_time: end,
                });
            }
        }

        let record = day
            .iter_mut()
            .find(|b| b.id == *id)
            .ok_or(StoreError::NotFound(*id))?;
        record.status = status;
        Ok(record.clone())
    }

    fn bookings_with_status(&self, status: BookingStatus) -> Vec<BookingRecord> {
        let mut found: Vec<BookingRecord> = self
            .days
            .iter()
            .flat_map(|day| {
                day.value()
                    .iter()
                    .filter(|b| b.status == status)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        found.sort_by_key(|b| b.created_at);
        found
    }
}
