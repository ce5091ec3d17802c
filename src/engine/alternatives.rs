use chrono::NaiveDate;

use crate::model::*;

/// Rank candidate dates by how many slots they offer.
///
/// `candidates` must be in ascending date order; dates without slots are
/// dropped, the rest sorted by descending slot count with ties keeping the
/// earlier date, and the top `limit` returned.
pub fn rank_alternatives(candidates: &[(NaiveDate, Vec<Slot>)], limit: usize) -> Vec<AlternativeDate> {
    let mut ranked: Vec<AlternativeDate> = candidates
        .iter()
        .filter_map(|(date, slots)| {
            slots.first().map(|first| AlternativeDate {
                date: *date,
                slot_count: slots.len(),
                earliest_start: first.start_time(),
            })
        })
        .collect();

    // sort_by is stable, so equal counts stay in date order.
    ranked.sort_by(|a, b| b.slot_count.cmp(&a.slot_count));
    ranked.truncate(limit);
    ranked
}

/// The `days_ahead` calendar days after `today`, nearest first.
pub fn horizon(today: NaiveDate, days_ahead: u32) -> impl Iterator<Item = NaiveDate> {
    today.iter_days().skip(1).take(days_ahead as usize)
}
