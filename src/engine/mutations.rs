use chrono::Utc;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::Rejection;
use super::store::StoreError;
use super::validator::{validate_booking, Proposal};
use super::{Engine, EngineError};

fn store_err(e: StoreError) -> EngineError {
    match e {
        StoreError::AlreadyExists(id) => EngineError::AlreadyExists(id),
        StoreError::NotFound(id) => EngineError::BookingNotFound(id),
        // A uniqueness hit is an overlap the validator could not see.
        StoreError::Duplicate { existing, .. } => EngineError::Rejected(Rejection::Overlap {
            booking: Some(existing),
        }),
    }
}

fn check_name(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{what} must not be empty")));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub fn create_center(&self, center: Center) -> Result<(), EngineError> {
        if self.store.center_count() >= MAX_CENTERS {
            return Err(EngineError::LimitExceeded("too many centers"));
        }
        check_name(&center.name, MAX_NAME_LEN, "center name")?;
        if center.location.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("center location"));
        }
        let id = center.id;
        self.store.insert_center(center).map_err(store_err)?;
        info!("center {id} created");
        Ok(())
    }

    pub fn create_service(&self, service: Service) -> Result<(), EngineError> {
        if self.store.service_count() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        check_name(&service.name, MAX_NAME_LEN, "service name")?;
        if service.duration_minutes == 0 {
            return Err(EngineError::InvalidInput("service duration must be positive".into()));
        }
        if service.duration_minutes > MAX_DURATION_MINUTES {
            return Err(EngineError::LimitExceeded("service duration"));
        }
        if service.price_cents < 0 {
            return Err(EngineError::InvalidInput("price must not be negative".into()));
        }
        let id = service.id;
        self.store.insert_service(service).map_err(store_err)?;
        info!("service {id} created");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Validate a proposed booking and, if it passes, persist it.
    ///
    /// Validation and insert run under the center's write lock, so two
    /// concurrent requests for the same center never both pass against the
    /// same snapshot.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<BookingRecord, EngineError> {
        self.require_center(req.center_id)?;
        let service = self.require_service(req.service_id)?;
        check_name(&req.customer_name, MAX_CUSTOMER_NAME_LEN, "customer name")?;
        let status = match req.status {
            None => BookingStatus::Booked,
            Some(BookingStatus::Cancelled) => {
                return Err(EngineError::InvalidInput(
                    "a booking cannot be created as cancelled".into(),
                ));
            }
            Some(s) => s,
        };

        let lock = self.center_lock(req.center_id);
        let _guard = lock.lock().await;

        let existing = self.store.bookings_on(req.center_id, req.date, self.config.occupancy);
        if existing.len() >= MAX_BOOKINGS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many bookings on this date"));
        }

        if let Err(rejection) =
            validate_booking(&Proposal::from(&req), service.duration_minutes, &existing, &self.config)
        {
            return Err(self.rejected(req.id, rejection));
        }

        let record = BookingRecord {
            id: req.id,
            center_id: req.center_id,
            service_id: req.service_id,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            customer_name: req.customer_name,
            status,
            created_at: Utc::now(),
        };
        match self.store.insert_booking(record.clone()) {
            Ok(()) => {}
            Err(StoreError::Duplicate { existing, .. }) => {
                return Err(self.rejected(record.id, Rejection::Overlap { booking: Some(existing) }));
            }
            Err(e) => return Err(store_err(e)),
        }

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "status" => status.as_str())
            .increment(1);
        info!(
            "booking {} created for center {} on {} {}-{} ({status})",
            record.id, record.center_id, record.date, record.start_time, record.end_time
        );
        Ok(record)
    }

    fn rejected(&self, id: Ulid, rejection: Rejection) -> EngineError {
        metrics::counter!(crate::observability::BOOKINGS_REJECTED_TOTAL, "reason" => rejection.label())
            .increment(1);
        debug!("booking {id} rejected: {rejection}");
        EngineError::Rejected(rejection)
    }

    /// Mark a booking cancelled. It stops occupying time immediately.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<BookingRecord, EngineError> {
        let current = self.get_booking(id)?;
        let lock = self.center_lock(current.center_id);
        let _guard = lock.lock().await;

        let current = self.get_booking(id)?;
        if current.status == BookingStatus::Cancelled {
            return Err(EngineError::InvalidInput(format!("booking {id} is already cancelled")));
        }
        let record = self.store.set_status(&id, BookingStatus::Cancelled).map_err(store_err)?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!("booking {id} cancelled");
        Ok(record)
    }

    /// Promote a pending booking to booked.
    ///
    /// The booking is re-validated against the other occupying bookings,
    /// since with `Occupancy::BOOKED_ONLY` a pending record may have been
    /// overtaken while it waited.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<BookingRecord, EngineError> {
        let current = self.get_booking(id)?;
        let lock = self.center_lock(current.center_id);
        let _guard = lock.lock().await;

        let current = self.get_booking(id)?;
        if current.status != BookingStatus::Pending {
            return Err(EngineError::InvalidInput(format!(
                "booking {id} is {}, not pending",
                current.status
            )));
        }
        let service = self.require_service(current.service_id)?;
        let others: Vec<BookingRecord> = self
            .store
            .bookings_on(current.center_id, current.date, self.config.occupancy)
            .into_iter()
            .filter(|b| b.id != id)
            .collect();
        let proposal = Proposal {
            date: current.date,
            start_time: current.start_time,
            end_time: current.end_time,
        };
        if let Err(rejection) = validate_booking(&proposal, service.duration_minutes, &others, &self.config) {
            return Err(self.rejected(id, rejection));
        }

        let record = self.store.set_status(&id, BookingStatus::Booked).map_err(store_err)?;
        info!("booking {id} confirmed");
        Ok(record)
    }
}
