use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::*;
use crate::config::EngineConfig;
use crate::limits::*;

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    date(d).and_time(t(h, m))
}

struct Fixture {
    engine: Engine,
    center: Ulid,
    /// 45 minute routine service.
    check: Ulid,
    /// 30 minute service.
    short: Ulid,
    /// 60 minute service.
    hour: Ulid,
    /// 4 hour modification.
    fit_out: Ulid,
    /// Fills the whole default workday.
    full_day: Ulid,
}

fn service(name: &str, category: ServiceCategory, duration_minutes: u32) -> Service {
    Service {
        id: Ulid::new(),
        name: name.into(),
        category,
        duration_minutes,
        price_cents: 10_000,
    }
}

fn fixture_with(config: EngineConfig) -> Fixture {
    let engine = Engine::in_memory(config);
    let center = Ulid::new();
    engine
        .create_center(Center {
            id: center,
            name: "North depot".into(),
            location: "1 Harbour Rd".into(),
        })
        .unwrap();

    let mut ids = Vec::new();
    for svc in [
        service("Annual check", ServiceCategory::Service, 45),
        service("Tyre swap", ServiceCategory::Service, 30),
        service("Diagnostics", ServiceCategory::Service, 60),
        service("Roof rack fit-out", ServiceCategory::Modification, 240),
        service("Full rebuild", ServiceCategory::Modification, 540),
    ] {
        ids.push(svc.id);
        engine.create_service(svc).unwrap();
    }

    Fixture {
        engine,
        center,
        check: ids[0],
        short: ids[1],
        hour: ids[2],
        fit_out: ids[3],
        full_day: ids[4],
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineConfig::default())
}

impl Fixture {
    fn request(&self, service_id: Ulid, d: NaiveDate, start: NaiveTime, end: NaiveTime) -> BookingRequest {
        BookingRequest {
            id: Ulid::new(),
            center_id: self.center,
            service_id,
            date: d,
            start_time: start,
            end_time: end,
            customer_name: "Grace".into(),
            status: None,
        }
    }

    async fn book(&self, service_id: Ulid, d: NaiveDate, start: NaiveTime, end: NaiveTime) -> BookingRecord {
        self.engine
            .create_booking(self.request(service_id, d, start, end))
            .await
            .unwrap()
    }

    async fn book_pending(&self, service_id: Ulid, d: NaiveDate, start: NaiveTime, end: NaiveTime) -> BookingRecord {
        let mut req = self.request(service_id, d, start, end);
        req.status = Some(BookingStatus::Pending);
        self.engine.create_booking(req).await.unwrap()
    }
}

// ── Availability ─────────────────────────────────────────

#[test]
fn empty_day_offers_whole_workday() {
    let f = fixture();
    let slots = f.engine.slots(f.center, date(2), 45).unwrap();
    assert_eq!(slots.first().unwrap().start, at(2, 9, 0));
    assert_eq!(slots.last().unwrap().start, at(2, 17, 15));
    assert_eq!(slots.len(), 12);
}

#[test]
fn open_availability_is_shortlisted() {
    let f = fixture();
    let result = f.engine.availability_as_of(f.center, date(2), f.check, date(1)).unwrap();
    match result {
        Availability::Open { slots } => {
            assert_eq!(slots.len(), 10);
            assert_eq!(slots[0].start_time(), t(9, 0));
            assert_eq!(slots[0].end_time(), t(9, 45));
        }
        other => panic!("expected open, got {other:?}"),
    }
}

#[tokio::test]
async fn existing_booking_blocks_buffered_range() {
    let f = fixture();
    f.book(f.hour, date(2), t(10, 0), t(11, 0)).await;

    let windows = f.engine.free_windows(f.center, date(2), 30).unwrap();
    assert_eq!(
        windows,
        vec![
            FreeWindow::new(at(2, 9, 0), at(2, 9, 15)),
            FreeWindow::new(at(2, 11, 15), at(2, 17, 30)),
        ]
    );

    let busy = TimeRange::new(at(2, 9, 45), at(2, 11, 15));
    let slots = f.engine.slots(f.center, date(2), 30).unwrap();
    assert!(!slots.is_empty());
    for slot in &slots {
        assert!(!(slot.start > at(2, 9, 45) && slot.start < at(2, 11, 15)));
        assert!(!TimeRange::new(slot.start, slot.end).overlaps(&busy));
    }
    assert_eq!(slots[0].start, at(2, 9, 0));
    assert_eq!(slots[1].start, at(2, 11, 30));
}

#[tokio::test]
async fn fully_booked_day_suggests_alternatives() {
    let f = fixture();
    f.book(f.full_day, date(2), t(9, 0), t(18, 0)).await;
    f.book(f.fit_out, date(3), t(9, 0), t(13, 0)).await;

    let result = f.engine.availability_as_of(f.center, date(2), f.check, date(1)).unwrap();
    let Availability::Unavailable {
        message,
        suggested_dates,
    } = result
    else {
        panic!("expected unavailable");
    };
    assert_eq!(message, "No slots available on this date.");
    let dates: Vec<_> = suggested_dates.iter().map(|a| a.date).collect();
    assert_eq!(dates, vec![date(4), date(5), date(6)]);
    for alt in &suggested_dates {
        assert_eq!(alt.slot_count, 12);
        assert_eq!(alt.earliest_start, t(9, 0));
    }
}

#[tokio::test]
async fn alternatives_rank_by_slot_count() {
    let f = fixture();
    // Every day in the horizon is partly booked except the 6th.
    f.book(f.fit_out, date(2), t(9, 0), t(13, 0)).await;
    for d in [3, 4, 5, 7, 8] {
        f.book(f.fit_out, date(d), t(13, 0), t(17, 0)).await;
    }
    let ranked = f.engine.suggest_alternatives(f.center, f.check, date(1)).unwrap();
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0].date, date(6));
    assert!(ranked.windows(2).all(|w| w[0].slot_count >= w[1].slot_count));
}

#[tokio::test]
async fn no_alternatives_when_horizon_is_full() {
    let f = fixture_with(EngineConfig {
        horizon_days: 2,
        ..EngineConfig::default()
    });
    for d in 2..=4 {
        f.book(f.full_day, date(d), t(9, 0), t(18, 0)).await;
    }
    let result = f.engine.availability_as_of(f.center, date(2), f.short, date(1)).unwrap();
    assert_eq!(
        result,
        Availability::Unavailable {
            message: "No slots available on this date.".into(),
            suggested_dates: vec![],
        }
    );
}

#[test]
fn unknown_ids_are_input_errors() {
    let f = fixture();
    let err = f.engine.availability_as_of(Ulid::new(), date(2), f.check, date(1)).unwrap_err();
    assert!(matches!(err, EngineError::CenterNotFound(_)));
    assert!(err.is_input_error());
    let err = f.engine.availability_as_of(f.center, date(2), Ulid::new(), date(1)).unwrap_err();
    assert!(matches!(err, EngineError::ServiceNotFound(_)));
}

#[test]
fn invalid_duration_rejected_before_engine() {
    let f = fixture();
    assert!(matches!(
        f.engine.slots(f.center, date(2), 0),
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        f.engine.slots(f.center, date(2), MAX_DURATION_MINUTES + 1),
        Err(EngineError::LimitExceeded(_))
    ));
}

#[test]
fn workday_comes_from_config() {
    let f = fixture_with(EngineConfig {
        workday: crate::config::Workday::new(t(8, 0), t(12, 0)).unwrap(),
        ..EngineConfig::default()
    });
    let slots = f.engine.slots(f.center, date(2), 60).unwrap();
    let starts: Vec<_> = slots.iter().map(|s| s.start_time()).collect();
    assert_eq!(starts, vec![t(8, 0), t(9, 0), t(10, 0), t(11, 0)]);
}

// ── Booking creation ─────────────────────────────────────

#[tokio::test]
async fn create_booking_defaults_to_booked() {
    let f = fixture();
    let record = f.book(f.check, date(2), t(10, 0), t(10, 45)).await;
    assert_eq!(record.status, BookingStatus::Booked);
    assert_eq!(f.engine.get_booking(record.id).unwrap(), record);
    assert_eq!(f.engine.list_bookings(f.center, date(2)).unwrap(), vec![record]);
}

#[tokio::test]
async fn booking_too_close_to_previous_rejected() {
    let f = fixture();
    // 55 minute booking ending 09:55.
    let long = service("Inspection", ServiceCategory::Service, 55);
    let long_id = long.id;
    f.engine.create_service(long).unwrap();
    f.book(long_id, date(2), t(9, 0), t(9, 55)).await;

    let err = f
        .engine
        .create_booking(f.request(f.check, date(2), t(10, 0), t(10, 45)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rejected(Rejection::TooCloseToPrevious {
            gap_minutes: 5,
            required: 15
        })
    ));
    assert!(!err.is_input_error());
    assert_eq!(err.to_string(), "booking rejected: too close to previous booking: 5 min gap, 15 min required");
}

#[tokio::test]
async fn booking_rejections_surface_reason() {
    let f = fixture();
    f.book(f.hour, date(2), t(12, 0), t(13, 0)).await;

    let cases = [
        (f.check, t(11, 0), t(10, 0), "invalid_time_range"),
        (f.check, t(10, 0), t(11, 0), "duration_mismatch"),
        (f.hour, t(12, 30), t(13, 30), "overlap"),
        (f.check, t(17, 30), t(18, 15), "outside_workday"),
        (f.check, t(11, 5), t(11, 50), "too_close_to_next"),
    ];
    for (svc, start, end, label) in cases {
        let err = f
            .engine
            .create_booking(f.request(svc, date(2), start, end))
            .await
            .unwrap_err();
        match err {
            EngineError::Rejected(r) => assert_eq!(r.label(), label),
            other => panic!("expected rejection {label}, got {other}"),
        }
    }
    assert_eq!(f.engine.list_bookings(f.center, date(2)).unwrap().len(), 1);
}

#[tokio::test]
async fn booking_input_errors() {
    let f = fixture();

    let mut req = f.request(f.check, date(2), t(10, 0), t(10, 45));
    req.center_id = Ulid::new();
    assert!(matches!(
        f.engine.create_booking(req).await,
        Err(EngineError::CenterNotFound(_))
    ));

    let mut req = f.request(f.check, date(2), t(10, 0), t(10, 45));
    req.status = Some(BookingStatus::Cancelled);
    assert!(matches!(
        f.engine.create_booking(req).await,
        Err(EngineError::InvalidInput(_))
    ));

    let mut req = f.request(f.check, date(2), t(10, 0), t(10, 45));
    req.customer_name = "x".repeat(MAX_CUSTOMER_NAME_LEN + 1);
    assert!(matches!(
        f.engine.create_booking(req).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let mut req = f.request(f.check, date(2), t(10, 0), t(10, 45));
    req.customer_name = "  ".into();
    assert!(matches!(
        f.engine.create_booking(req).await,
        Err(EngineError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn reused_booking_id_rejected() {
    let f = fixture();
    let first = f.book(f.check, date(2), t(10, 0), t(10, 45)).await;
    let mut req = f.request(f.check, date(3), t(10, 0), t(10, 45));
    req.id = first.id;
    assert!(matches!(
        f.engine.create_booking(req).await,
        Err(EngineError::AlreadyExists(id)) if id == first.id
    ));
}

#[tokio::test]
async fn accepted_booking_removes_its_slot() {
    let f = fixture();
    let before = f.engine.slots(f.center, date(2), 45).unwrap();
    let first = before[0];
    f.book(f.check, date(2), first.start_time(), first.end_time()).await;
    let after = f.engine.slots(f.center, date(2), 45).unwrap();
    assert!(after.iter().all(|s| s.start >= first.end + chrono::TimeDelta::minutes(15)));
}

// ── Cancel / confirm ─────────────────────────────────────

#[tokio::test]
async fn cancel_frees_the_slot() {
    let f = fixture();
    let record = f.book(f.check, date(2), t(10, 0), t(10, 45)).await;
    let cancelled = f.engine.cancel_booking(record.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    // Same slot can be booked again.
    let again = f.book(f.check, date(2), t(10, 0), t(10, 45)).await;
    assert_eq!(again.status, BookingStatus::Booked);

    let all = f.engine.list_bookings(f.center, date(2)).unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn cancel_twice_is_an_error() {
    let f = fixture();
    let record = f.book(f.check, date(2), t(10, 0), t(10, 45)).await;
    f.engine.cancel_booking(record.id).await.unwrap();
    assert!(matches!(
        f.engine.cancel_booking(record.id).await,
        Err(EngineError::InvalidInput(_))
    ));
    assert!(matches!(
        f.engine.cancel_booking(Ulid::new()).await,
        Err(EngineError::BookingNotFound(_))
    ));
}

#[tokio::test]
async fn confirm_promotes_pending() {
    let f = fixture();
    let record = f.book_pending(f.check, date(2), t(10, 0), t(10, 45)).await;
    assert_eq!(f.engine.pending_bookings(), vec![record.clone()]);

    let confirmed = f.engine.confirm_booking(record.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Booked);
    assert!(f.engine.pending_bookings().is_empty());
    assert!(matches!(
        f.engine.confirm_booking(record.id).await,
        Err(EngineError::InvalidInput(_))
    ));
}

// ── Occupancy policy ─────────────────────────────────────

#[tokio::test]
async fn pending_blocks_by_default() {
    let f = fixture();
    f.book_pending(f.check, date(2), t(10, 0), t(10, 45)).await;
    let err = f
        .engine
        .create_booking(f.request(f.check, date(2), t(10, 15), t(11, 0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Rejected(Rejection::Overlap { .. })));

    let slots = f.engine.slots(f.center, date(2), 45).unwrap();
    assert!(slots.iter().all(|s| s.end <= at(2, 9, 45) || s.start >= at(2, 11, 0)));
}

#[tokio::test]
async fn pending_ignored_when_only_booked_occupies() {
    let f = fixture_with(EngineConfig {
        occupancy: Occupancy::BOOKED_ONLY,
        ..EngineConfig::default()
    });
    let pending = f.book_pending(f.check, date(2), t(10, 0), t(10, 45)).await;

    let slots = f.engine.slots(f.center, date(2), 45).unwrap();
    assert_eq!(slots.len(), 12);

    f.book(f.check, date(2), t(10, 15), t(11, 0)).await;

    // The pending one was overtaken and can no longer be confirmed.
    let err = f.engine.confirm_booking(pending.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Rejected(Rejection::Overlap { .. })));
    assert_eq!(f.engine.get_booking(pending.id).unwrap().status, BookingStatus::Pending);
}

#[tokio::test]
async fn uniqueness_violation_maps_to_overlap() {
    let f = fixture_with(EngineConfig {
        occupancy: Occupancy::BOOKED_ONLY,
        ..EngineConfig::default()
    });
    let first = f.book_pending(f.check, date(2), t(10, 0), t(10, 45)).await;

    // Pending does not occupy, so only the store's uniqueness catches this.
    let mut req = f.request(f.check, date(2), t(10, 0), t(10, 45));
    req.status = Some(BookingStatus::Pending);
    let err = f.engine.create_booking(req).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rejected(Rejection::Overlap { booking: Some(id) }) if id == first.id
    ));
}

#[tokio::test]
async fn booked_only_offers_pending_times_that_cannot_be_taken() {
    let f = fixture_with(EngineConfig {
        occupancy: Occupancy::BOOKED_ONLY,
        ..EngineConfig::default()
    });
    let pending = f.book_pending(f.check, date(2), t(9, 45), t(10, 30)).await;

    // The read path ignores pending records, so the exact same times are offered.
    let slots = f.engine.slots(f.center, date(2), 45).unwrap();
    assert!(slots.iter().any(|s| s.start_time() == t(9, 45) && s.end_time() == t(10, 30)));

    // Writing that slot still hits the uniqueness rule.
    let err = f
        .engine
        .create_booking(f.request(f.check, date(2), t(9, 45), t(10, 30)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rejected(Rejection::Overlap { booking: Some(id) }) if id == pending.id
    ));

    // Overlapping the pending record without matching it is accepted.
    f.book(f.check, date(2), t(10, 0), t(10, 45)).await;
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_admit_one() {
    let f = fixture();
    let engine = Arc::new(f.engine);
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        let req = BookingRequest {
            id: Ulid::new(),
            center_id: f.center,
            service_id: f.check,
            date: date(2),
            start_time: t(10, 0),
            end_time: t(10, 45),
            customer_name: format!("customer {i}"),
            status: None,
        };
        handles.push(tokio::spawn(async move { engine.create_booking(req).await }));
    }

    let mut accepted = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => accepted += 1,
            Err(EngineError::Rejected(Rejection::Overlap { .. })) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(engine.list_bookings(f.center, date(2)).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_neighbors_respect_buffer() {
    let f = fixture();
    let engine = Arc::new(f.engine);
    // Starts every 15 minutes; at most one per hour fits with buffers.
    let mut handles = Vec::new();
    for i in 0..12 {
        let engine = engine.clone();
        let start = t(9, 0) + chrono::TimeDelta::minutes(15 * i);
        let req = BookingRequest {
            id: Ulid::new(),
            center_id: f.center,
            service_id: f.check,
            date: date(2),
            start_time: start,
            end_time: start + chrono::TimeDelta::minutes(45),
            customer_name: "racer".into(),
            status: None,
        };
        handles.push(tokio::spawn(async move { engine.create_booking(req).await }));
    }
    for h in handles {
        let _ = h.await.unwrap();
    }

    let accepted = engine.list_bookings(f.center, date(2)).unwrap();
    assert!(!accepted.is_empty());
    for pair in accepted.windows(2) {
        let gap = pair[1].range().start - pair[0].range().end;
        assert!(gap >= chrono::TimeDelta::minutes(15), "gap {gap} too small");
    }
}

// ── Catalog ──────────────────────────────────────────────

#[test]
fn catalog_validation() {
    let f = fixture();
    assert_eq!(f.engine.list_centers().len(), 1);
    assert_eq!(f.engine.list_services().len(), 5);

    let dup = f.engine.list_centers()[0].clone();
    assert!(matches!(f.engine.create_center(dup), Err(EngineError::AlreadyExists(_))));

    let mut bad = service("Nothing", ServiceCategory::Service, 0);
    assert!(matches!(f.engine.create_service(bad.clone()), Err(EngineError::InvalidInput(_))));
    bad.duration_minutes = 30;
    bad.price_cents = -1;
    assert!(matches!(f.engine.create_service(bad), Err(EngineError::InvalidInput(_))));

    let long_name = service(&"n".repeat(MAX_NAME_LEN + 1), ServiceCategory::Service, 30);
    assert!(matches!(f.engine.create_service(long_name), Err(EngineError::LimitExceeded(_))));
}
