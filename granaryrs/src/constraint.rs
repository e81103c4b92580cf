//! The request distilled down to what table resolution needs.
//!
//! A [`QueryPlanningConstraint`] strips a bound request and its merged metric
//! template to column names, intervals, and grain. Resolvers and availability
//! checks work from this value alone, so they stay independent of the full
//! request surface.

use std::collections::BTreeSet;

use crate::granularity::{Granularity, ZonedTimeGrain};
use crate::intervals::IntervalSet;
use crate::metric::MetricTemplate;
use crate::request::DataRequest;

#[derive(Debug, Clone)]
pub struct QueryPlanningConstraint {
    request_dimension_names: BTreeSet<String>,
    filter_dimension_names: BTreeSet<String>,
    metric_names: BTreeSet<String>,
    all_column_names: BTreeSet<String>,
    intervals: IntervalSet,
    request_granularity: Granularity,
    minimum_grain: Granularity,
}

impl QueryPlanningConstraint {
    /// Distill `request` against its merged template.
    ///
    /// Metric columns come from the innermost aggregations, the raw fields a
    /// physical table actually has to carry. The minimum grain is the
    /// innermost template grain override re-zoned to the request time zone,
    /// or the request granularity when no level overrides.
    pub fn new(request: &DataRequest, template: &MetricTemplate) -> Self {
        let request_dimension_names: BTreeSet<String> = request
            .dimensions()
            .iter()
            .map(|d| d.api_name().to_string())
            .collect();
        let filter_dimension_names = request.filter_dimension_names();
        let metric_names = template.dependent_field_names();

        let mut all_column_names = BTreeSet::new();
        all_column_names.extend(request_dimension_names.iter().cloned());
        all_column_names.extend(filter_dimension_names.iter().cloned());
        all_column_names.extend(metric_names.iter().cloned());

        let minimum_grain = match template.innermost().time_grain() {
            Some(grain) => Granularity::Grain(grain.zoned(request.time_zone())),
            None => *request.granularity(),
        };

        QueryPlanningConstraint {
            request_dimension_names,
            filter_dimension_names,
            metric_names,
            all_column_names,
            intervals: request.intervals().iter().cloned().collect(),
            request_granularity: *request.granularity(),
            minimum_grain,
        }
    }

    /// Assemble a constraint from already-derived pieces.
    pub fn from_parts(
        request_dimension_names: BTreeSet<String>,
        filter_dimension_names: BTreeSet<String>,
        metric_names: BTreeSet<String>,
        intervals: IntervalSet,
        request_granularity: Granularity,
        minimum_grain: Granularity,
    ) -> Self {
        let mut all_column_names = BTreeSet::new();
        all_column_names.extend(request_dimension_names.iter().cloned());
        all_column_names.extend(filter_dimension_names.iter().cloned());
        all_column_names.extend(metric_names.iter().cloned());
        QueryPlanningConstraint {
            request_dimension_names,
            filter_dimension_names,
            metric_names,
            all_column_names,
            intervals,
            request_granularity,
            minimum_grain,
        }
    }

    pub fn request_dimension_names(&self) -> &BTreeSet<String> {
        &self.request_dimension_names
    }

    pub fn filter_dimension_names(&self) -> &BTreeSet<String> {
        &self.filter_dimension_names
    }

    pub fn metric_names(&self) -> &BTreeSet<String> {
        &self.metric_names
    }

    /// Union of grouped dimensions, filtered dimensions, and metric columns.
    pub fn all_column_names(&self) -> &BTreeSet<String> {
        &self.all_column_names
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }

    pub fn request_granularity(&self) -> &Granularity {
        &self.request_granularity
    }

    pub fn minimum_grain(&self) -> &Granularity {
        &self.minimum_grain
    }

    /// Whether a table stored at `table_grain` can be rolled up to the
    /// minimum grain. An `all` minimum accepts any storage grain; zones are
    /// not compared here, only the grains.
    pub fn grain_satisfied_by(&self, table_grain: &ZonedTimeGrain) -> bool {
        match &self.minimum_grain {
            Granularity::All(_) => true,
            Granularity::Grain(required) => {
                required.grain().satisfied_by(table_grain.grain())
            }
        }
    }
}
