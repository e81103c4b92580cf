//! Turning a bound request into a native Druid query.
//!
//! The builder picks the cheapest query shape the request allows. A single
//! grouping dimension ordered by a single metric can run as a Druid `topN`;
//! a request with no grouping at all can run as a `timeseries`; everything
//! else, in particular any multi-pass metric template, becomes a `groupBy`
//! with the passes expressed as nested query datasources.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono_tz::Tz;

use crate::constraint::QueryPlanningConstraint;
use crate::error::Result;
use crate::granularity::Granularity;
use crate::metric::MetricTemplate;
use crate::query::model::{
    DataSource, DruidQuery, GroupByQuery, HavingSpec, LimitSpec, OrderByColumn, QueryFilter,
    TimeseriesQuery, TopNMetricSpec, TopNQuery, TIME_COLUMN,
};
use crate::request::DataRequest;
use crate::resolver::PhysicalTableResolver;
use crate::table::ConstrainedTable;

mod filters;
pub mod model;

/// Planning knobs, usually derived from the loaded configuration.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Allows eligible requests to run as Druid `topN` instead of `groupBy`.
    pub top_n_enabled: bool,
    /// Context entries stamped onto the outermost outgoing query.
    pub query_context: BTreeMap<String, serde_json::Value>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            top_n_enabled: true,
            query_context: BTreeMap::new(),
        }
    }
}

/// Plans Druid queries for bound requests.
pub struct QueryBuilder {
    resolver: Arc<dyn PhysicalTableResolver>,
    options: QueryOptions,
}

impl QueryBuilder {
    pub fn new(resolver: Arc<dyn PhysicalTableResolver>, options: QueryOptions) -> Self {
        QueryBuilder { resolver, options }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Plan the query for `request` aggregating through `template`.
    ///
    /// Filters translate first, so an unmatched filter fails before any
    /// table resolution. The physical table is chosen once and shared by
    /// every nesting level.
    pub fn build_query(
        &self,
        request: &DataRequest,
        template: &MetricTemplate,
    ) -> Result<DruidQuery> {
        let filter = filters::build_query_filter(request)?;
        let having = filters::build_having_spec(request);

        let constraint = QueryPlanningConstraint::new(request, template);
        let physical = self.resolver.resolve(request.table(), &constraint)?;
        let table = ConstrainedTable::new(physical, constraint);

        if self.can_optimize_top_n(request, template) {
            if let Some(query) = self.build_top_n(request, template, &table, filter.clone()) {
                return Ok(self.with_context(query));
            }
        }
        if can_optimize_time_series(request, template) {
            let query = self.build_time_series(request, template, &table, filter);
            return Ok(self.with_context(query));
        }

        let query = build_group_by(
            request,
            template,
            &table,
            *request.granularity(),
            filter,
            having,
            build_limit_spec(request),
        );
        Ok(self.with_context(DruidQuery::GroupBy(query)))
    }

    /// TopN wins only for a single grouping dimension ordered by a single
    /// metric, with a flat template, no havings, and the feature on.
    fn can_optimize_top_n(&self, request: &DataRequest, template: &MetricTemplate) -> bool {
        request.top_n().is_some()
            && request.dimensions().len() == 1
            && request.sorts().len() == 1
            && !template.is_nested()
            && self.options.top_n_enabled
            && request.havings().is_empty()
    }

    fn build_top_n(
        &self,
        request: &DataRequest,
        template: &MetricTemplate,
        table: &ConstrainedTable,
        filter: Option<QueryFilter>,
    ) -> Option<DruidQuery> {
        let dimension = request.dimensions().first()?;
        let sort = request.sorts().first()?;
        let threshold = request.top_n()?;
        Some(DruidQuery::TopN(TopNQuery {
            data_source: DataSource::from_names(table.datasource_names()),
            dimension: dimension.api_name().to_string(),
            metric: TopNMetricSpec::for_sort(sort.column.clone(), sort.direction),
            threshold,
            granularity: effective_granularity(
                template,
                request.granularity(),
                request.time_zone(),
            ),
            filter,
            aggregations: template.aggregations().to_vec(),
            post_aggregations: template.post_aggregations().to_vec(),
            intervals: request.intervals().to_vec(),
            context: BTreeMap::new(),
        }))
    }

    fn build_time_series(
        &self,
        request: &DataRequest,
        template: &MetricTemplate,
        table: &ConstrainedTable,
        filter: Option<QueryFilter>,
    ) -> DruidQuery {
        DruidQuery::Timeseries(TimeseriesQuery {
            data_source: DataSource::from_names(table.datasource_names()),
            granularity: effective_granularity(
                template,
                request.granularity(),
                request.time_zone(),
            ),
            filter,
            aggregations: template.aggregations().to_vec(),
            post_aggregations: template.post_aggregations().to_vec(),
            intervals: request.intervals().to_vec(),
            context: BTreeMap::new(),
        })
    }

    fn with_context(&self, mut query: DruidQuery) -> DruidQuery {
        if self.options.query_context.is_empty() {
            return query;
        }
        let context = self.options.query_context.clone();
        match &mut query {
            DruidQuery::GroupBy(inner) => inner.context = context,
            DruidQuery::TopN(inner) => inner.context = context,
            DruidQuery::Timeseries(inner) => inner.context = context,
        }
        query
    }
}

/// Timeseries wins only when nothing groups, orders, truncates, or
/// post-filters the rows. A time sort alone does not block it.
fn can_optimize_time_series(request: &DataRequest, template: &MetricTemplate) -> bool {
    request.dimensions().is_empty()
        && !template.is_nested()
        && request.sorts().is_empty()
        && request.count().is_none()
        && request.havings().is_empty()
}

/// One group-by level per template level, innermost reading the table.
///
/// The filter rides all the way down to the leaf; the having and limit-spec
/// stay on the outermost level; each level's grain override, re-zoned to the
/// request time zone, becomes the default for the level inside it.
fn build_group_by(
    request: &DataRequest,
    template: &MetricTemplate,
    table: &ConstrainedTable,
    inherited: Granularity,
    filter: Option<QueryFilter>,
    having: Option<HavingSpec>,
    limit_spec: Option<LimitSpec>,
) -> GroupByQuery {
    let granularity = effective_granularity(template, &inherited, request.time_zone());
    let (data_source, own_filter) = match template.inner() {
        None => (DataSource::from_names(table.datasource_names()), filter),
        Some(inner) => {
            let inner_query =
                build_group_by(request, inner, table, granularity, filter, None, None);
            (DataSource::nested(inner_query), None)
        }
    };
    GroupByQuery {
        data_source,
        dimensions: request
            .dimensions()
            .iter()
            .map(|d| d.api_name().to_string())
            .collect(),
        granularity,
        filter: own_filter,
        aggregations: template.aggregations().to_vec(),
        post_aggregations: template.post_aggregations().to_vec(),
        having,
        limit_spec,
        intervals: request.intervals().to_vec(),
        context: BTreeMap::new(),
    }
}

/// A level's grain override wins over the inherited grain and adopts the
/// request time zone.
fn effective_granularity(
    template: &MetricTemplate,
    inherited: &Granularity,
    time_zone: Tz,
) -> Granularity {
    match template.time_grain() {
        Some(grain) => Granularity::Grain(grain.zoned(time_zone)),
        None => *inherited,
    }
}

/// Ordering and truncation for the group-by path: the time sort leads the
/// metric sorts, and the request count caps the row total.
fn build_limit_spec(request: &DataRequest) -> Option<LimitSpec> {
    let mut columns: Vec<OrderByColumn> = Vec::new();
    if let Some(direction) = request.date_time_sort() {
        columns.push(OrderByColumn::new(TIME_COLUMN, direction.into()));
    }
    columns.extend(
        request
            .sorts()
            .iter()
            .map(|sort| OrderByColumn::new(sort.column.clone(), sort.direction.into())),
    );
    if columns.is_empty() && request.count().is_none() {
        return None;
    }
    Some(LimitSpec::Default {
        columns,
        limit: request.count(),
    })
}
