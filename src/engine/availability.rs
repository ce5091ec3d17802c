use chrono::TimeDelta;

use crate::model::*;

// ── Interval Merger ───────────────────────────────────────────────

/// Merge busy periods into a sorted, disjoint, minimal cover.
///
/// Periods merge when they overlap *or* when the next one starts within
/// `buffer` of the running end, so consecutive outputs are always separated
/// by more than `buffer`.
pub fn merge_busy(periods: &[TimeRange], buffer: TimeDelta) -> Vec<TimeRange> {
    let mut sorted = periods.to_vec();
    sorted.sort_by_key(|r| r.start);

    let mut merged: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end + buffer
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

// ── Free-Window Calculator ────────────────────────────────────────

/// Derive the windows of valid start times for a booking of `duration`.
///
/// Every busy period is widened by `buffer` on both sides and merged before
/// gaps are taken. A raw gap `[g0, g1]` becomes the window
/// `[g0, g1 - duration]`, and is dropped when shorter than `duration`.
/// Busy time outside the workday only clips it.
pub fn free_windows(
    workday: &TimeRange,
    busy: &[TimeRange],
    duration: TimeDelta,
    buffer: TimeDelta,
) -> Vec<FreeWindow> {
    let buffered: Vec<TimeRange> = busy.iter().map(|r| r.expand(buffer)).collect();
    let merged = merge_busy(&buffered, buffer);

    let mut windows = Vec::with_capacity(merged.len() + 1);
    let mut cursor = workday.start;

    for b in &merged {
        if b.end <= workday.start {
            continue;
        }
        if b.start >= workday.end {
            break;
        }
        push_gap(&mut windows, cursor, b.start, duration);
        cursor = cursor.max(b.end);
        if cursor >= workday.end {
            return windows;
        }
    }
    push_gap(&mut windows, cursor, workday.end, duration);
    windows
}

fn push_gap(
    windows: &mut Vec<FreeWindow>,
    gap_start: chrono::NaiveDateTime,
    gap_end: chrono::NaiveDateTime,
    duration: TimeDelta,
) {
    if gap_end - gap_start >= duration {
        windows.push(FreeWindow::new(gap_start, gap_end - duration));
    }
}
