//! Finding the request intervals the physical data cannot answer.

use std::sync::Arc;

use crate::constraint::QueryPlanningConstraint;
use crate::granularity::Granularity;
use crate::intervals::IntervalSet;
use crate::table::PhysicalTable;

/// Buckets of the requested intervals that no candidate table can serve.
///
/// Availability is the union across `tables` of each table's availability
/// under the constraint. A bucket at the given granularity is missing when
/// availability does not cover it end to end, so a bucket with any hole at
/// all counts as missing. Under the `all` granularity the whole request is
/// one bucket: one hole anywhere and every requested interval comes back.
pub fn find_missing_time_grain_intervals(
    tables: &[Arc<PhysicalTable>],
    constraint: &QueryPlanningConstraint,
    requested: &IntervalSet,
    granularity: &Granularity,
) -> IntervalSet {
    let availability = tables.iter().fold(IntervalSet::empty(), |acc, table| {
        acc.union(&table.available_intervals(constraint))
    });

    let mut missing = Vec::new();
    for bucket in granularity.intervals_over(requested.as_slice()) {
        if !availability.covers(&bucket) {
            missing.push(bucket);
        }
    }

    if granularity.is_all() && !missing.is_empty() {
        return requested.clone();
    }
    IntervalSet::new(missing)
}
