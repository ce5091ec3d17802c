use chrono::NaiveDate;

use crate::config::EngineConfig;
use crate::model::*;

use super::error::Rejection;

/// The part of a booking the validator inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal {
    pub date: NaiveDate,
    pub start_time: chrono::NaiveTime,
    pub end_time: chrono::NaiveTime,
}

impl From<&BookingRequest> for Proposal {
    fn from(req: &BookingRequest) -> Self {
        Self {
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
        }
    }
}

/// Check a proposed booking against `existing` (the occupying bookings of the
/// same center and date). Checks run in a fixed order and stop at the first
/// failure: time range, duration, overlap, workday bounds, neighbor buffer.
pub fn validate_booking(
    proposal: &Proposal,
    service_duration_minutes: u32,
    existing: &[BookingRecord],
    config: &EngineConfig,
) -> Result<(), Rejection> {
    if proposal.end_time <= proposal.start_time {
        return Err(Rejection::InvalidTimeRange);
    }
    let proposed = TimeRange::on(proposal.date, proposal.start_time, proposal.end_time);

    let actual_secs = proposed.duration().num_seconds();
    let expected_secs = i64::from(service_duration_minutes) * 60;
    let tolerance_secs = i64::from(config.duration_tolerance_minutes) * 60;
    if (actual_secs - expected_secs).abs() > tolerance_secs {
        return Err(Rejection::DurationMismatch {
            expected_minutes: service_duration_minutes,
            actual_minutes: proposed.duration().num_minutes(),
        });
    }

    if let Some(hit) = existing.iter().find(|b| b.range().overlaps(&proposed)) {
        return Err(Rejection::Overlap { booking: Some(hit.id) });
    }

    let workday = config.workday;
    if proposal.start_time < workday.open || proposal.end_time > workday.close {
        return Err(Rejection::OutsideWorkday {
            open: workday.open,
            close: workday.close,
        });
    }

    let required = i64::from(config.buffer_minutes);
    let previous_end = existing
        .iter()
        .map(|b| b.range().end)
        .filter(|end| *end <= proposed.start)
        .max();
    if let Some(end) = previous_end {
        let gap = (proposed.start - end).num_minutes();
        if gap < required {
            return Err(Rejection::TooCloseToPrevious {
                gap_minutes: gap,
                required: config.buffer_minutes,
            });
        }
    }

    let next_start = existing
        .iter()
        .map(|b| b.range().start)
        .filter(|start| *start >= proposed.end)
        .min();
    if let Some(start) = next_start {
        let gap = (start - proposed.end).num_minutes();
        if gap < required {
            return Err(Rejection::TooCloseToNext {
                gap_minutes: gap,
                required: config.buffer_minutes,
            });
        }
    }

    Ok(())
}
