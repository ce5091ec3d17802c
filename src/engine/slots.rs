use chrono::{NaiveDateTime, TimeDelta, Timelike};

use crate::model::*;

/// How offered start times are spaced and aligned for one service duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPolicy {
    /// Minutes between successive offered starts within one window.
    pub cadence_minutes: u32,
    /// A window's first offer is moved up to the next multiple of this.
    pub align_minutes: u32,
}

impl SlotPolicy {
    /// Duration-tiered policy: long services get sparse, hour-aligned offers,
    /// short ones get denser offers on finer boundaries.
    pub fn for_duration(duration_minutes: u32) -> Self {
        let (cadence_minutes, align_minutes) = match duration_minutes {
            240.. => (240, 60),
            120..240 => (120, 60),
            60..120 => (60, 60),
            30..60 => (45, 30),
            _ => (30, 15),
        };
        Self {
            cadence_minutes,
            align_minutes,
        }
    }
}

/// Move `t` up to the next multiple of `align_minutes` past midnight.
/// Already-aligned instants are returned unchanged.
pub fn align_up(t: NaiveDateTime, align_minutes: u32) -> NaiveDateTime {
    let step = i64::from(align_minutes.max(1)) * 60;
    let secs = i64::from(t.num_seconds_from_midnight());
    let rem = secs % step;
    let floor = t - TimeDelta::seconds(rem) - TimeDelta::nanoseconds(i64::from(t.nanosecond()));
    if floor == t {
        t
    } else {
        floor + TimeDelta::seconds(step)
    }
}

/// Enumerate offerable slots inside `windows`, earliest first, at most `max`.
///
/// `day_close` bounds every slot's end; each slot records the minutes left
/// until it.
pub fn generate_slots(
    windows: &[FreeWindow],
    duration_minutes: u32,
    day_close: NaiveDateTime,
    max: usize,
) -> Vec<Slot> {
    let policy = SlotPolicy::for_duration(duration_minutes);
    let duration = TimeDelta::minutes(i64::from(duration_minutes));
    let cadence = TimeDelta::minutes(i64::from(policy.cadence_minutes));

    let mut slots = Vec::new();
    for window in windows {
        let mut start = align_up(window.earliest_start, policy.align_minutes);
        while start <= window.latest_start {
            let end = start + duration;
            if end <= day_close {
                slots.push(Slot {
                    start,
                    end,
                    gap_remaining_after_minutes: (day_close - end).num_minutes(),
                });
            }
            start += cadence;
        }
    }

    // Stable: equal starts keep window order.
    slots.sort_by_key(|s| s.start);
    slots.truncate(max);
    slots
}
