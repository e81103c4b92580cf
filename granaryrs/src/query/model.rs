//! The native Druid query shapes the planner emits.
//!
//! These types serialize straight to Druid's JSON query language and are
//! write-only: queries are assembled here and posted out, never read back.
//! Field and tag casing therefore follows the wire format exactly.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::granularity::Granularity;
use crate::intervals::Interval;
use crate::metric::{Aggregation, PostAggregation};
use crate::request::SortDirection;

/// Druid's reserved name for the time dimension.
pub const TIME_COLUMN: &str = "__time";

/// Query kinds the result parser understands. Only the first three are ever
/// produced by the planner; `Lookback` arrives from pre-built query plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryType {
    GroupBy,
    TopN,
    Timeseries,
    Lookback,
    TimeBoundary,
    SegmentMetadata,
    Search,
}

impl QueryType {
    pub fn name(&self) -> &'static str {
        match self {
            QueryType::GroupBy => "groupBy",
            QueryType::TopN => "topN",
            QueryType::Timeseries => "timeseries",
            QueryType::Lookback => "lookback",
            QueryType::TimeBoundary => "timeBoundary",
            QueryType::SegmentMetadata => "segmentMetadata",
            QueryType::Search => "search",
        }
    }
}

/// Where a query reads from: a single table, a union of tables, or the
/// results of an inner group-by.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DataSource {
    Table {
        name: String,
    },
    Union {
        #[serde(rename = "dataSources")]
        data_sources: Vec<String>,
    },
    Query {
        query: Box<GroupByQuery>,
    },
}

impl DataSource {
    /// Table for a single name, union for several.
    pub fn from_names(names: &[String]) -> DataSource {
        if names.len() == 1 {
            DataSource::Table {
                name: names[0].clone(),
            }
        } else {
            DataSource::Union {
                data_sources: names.to_vec(),
            }
        }
    }

    pub fn nested(query: GroupByQuery) -> DataSource {
        DataSource::Query {
            query: Box::new(query),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueryFilter {
    Selector {
        dimension: String,
        value: String,
    },
    In {
        dimension: String,
        values: Vec<String>,
    },
    And {
        fields: Vec<QueryFilter>,
    },
    Or {
        fields: Vec<QueryFilter>,
    },
    Not {
        field: Box<QueryFilter>,
    },
}

impl QueryFilter {
    pub fn selector(dimension: impl Into<String>, value: impl Into<String>) -> QueryFilter {
        QueryFilter::Selector {
            dimension: dimension.into(),
            value: value.into(),
        }
    }

    pub fn in_values(dimension: impl Into<String>, values: Vec<String>) -> QueryFilter {
        QueryFilter::In {
            dimension: dimension.into(),
            values,
        }
    }

    /// Conjunction that collapses: none for no terms, the lone term as-is.
    pub fn and(mut fields: Vec<QueryFilter>) -> Option<QueryFilter> {
        match fields.len() {
            0 => None,
            1 => fields.pop(),
            _ => Some(QueryFilter::And { fields }),
        }
    }

    pub fn or(mut fields: Vec<QueryFilter>) -> Option<QueryFilter> {
        match fields.len() {
            0 => None,
            1 => fields.pop(),
            _ => Some(QueryFilter::Or { fields }),
        }
    }

    pub fn not(field: QueryFilter) -> QueryFilter {
        QueryFilter::Not {
            field: Box::new(field),
        }
    }
}

/// Post-aggregation predicates on grouped rows. Values stay [`Decimal`] so a
/// threshold like `0.1` is compared as written.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HavingSpec {
    EqualTo {
        aggregation: String,
        value: Decimal,
    },
    GreaterThan {
        aggregation: String,
        value: Decimal,
    },
    LessThan {
        aggregation: String,
        value: Decimal,
    },
    And {
        #[serde(rename = "havingSpecs")]
        having_specs: Vec<HavingSpec>,
    },
    Or {
        #[serde(rename = "havingSpecs")]
        having_specs: Vec<HavingSpec>,
    },
    Not {
        #[serde(rename = "havingSpec")]
        having_spec: Box<HavingSpec>,
    },
}

impl HavingSpec {
    pub fn equal_to(aggregation: impl Into<String>, value: Decimal) -> HavingSpec {
        HavingSpec::EqualTo {
            aggregation: aggregation.into(),
            value,
        }
    }

    pub fn greater_than(aggregation: impl Into<String>, value: Decimal) -> HavingSpec {
        HavingSpec::GreaterThan {
            aggregation: aggregation.into(),
            value,
        }
    }

    pub fn less_than(aggregation: impl Into<String>, value: Decimal) -> HavingSpec {
        HavingSpec::LessThan {
            aggregation: aggregation.into(),
            value,
        }
    }

    pub fn and(mut having_specs: Vec<HavingSpec>) -> Option<HavingSpec> {
        match having_specs.len() {
            0 => None,
            1 => having_specs.pop(),
            _ => Some(HavingSpec::And { having_specs }),
        }
    }

    pub fn or(mut having_specs: Vec<HavingSpec>) -> Option<HavingSpec> {
        match having_specs.len() {
            0 => None,
            1 => having_specs.pop(),
            _ => Some(HavingSpec::Or { having_specs }),
        }
    }

    pub fn not(having_spec: HavingSpec) -> HavingSpec {
        HavingSpec::Not {
            having_spec: Box::new(having_spec),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryDirection {
    Ascending,
    Descending,
}

impl From<SortDirection> for QueryDirection {
    fn from(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => QueryDirection::Ascending,
            SortDirection::Desc => QueryDirection::Descending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderByColumn {
    pub dimension: String,
    pub direction: QueryDirection,
}

impl OrderByColumn {
    pub fn new(dimension: impl Into<String>, direction: QueryDirection) -> Self {
        OrderByColumn {
            dimension: dimension.into(),
            direction,
        }
    }
}

/// Group-by ordering and truncation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LimitSpec {
    Default {
        columns: Vec<OrderByColumn>,
        #[serde(skip_serializing_if = "Option::is_none")]
        limit: Option<u64>,
    },
}

/// Ranking metric for topN. `Inverted` flips to ascending order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TopNMetricSpec {
    Numeric { metric: String },
    Inverted { metric: Box<TopNMetricSpec> },
}

impl TopNMetricSpec {
    pub fn for_sort(metric: impl Into<String>, direction: SortDirection) -> TopNMetricSpec {
        let numeric = TopNMetricSpec::Numeric {
            metric: metric.into(),
        };
        match direction {
            SortDirection::Desc => numeric,
            SortDirection::Asc => TopNMetricSpec::Inverted {
                metric: Box::new(numeric),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByQuery {
    pub data_source: DataSource,
    pub dimensions: Vec<String>,
    pub granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<QueryFilter>,
    pub aggregations: Vec<Aggregation>,
    pub post_aggregations: Vec<PostAggregation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub having: Option<HavingSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_spec: Option<LimitSpec>,
    pub intervals: Vec<Interval>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopNQuery {
    pub data_source: DataSource,
    pub dimension: String,
    pub metric: TopNMetricSpec,
    pub threshold: u64,
    pub granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<QueryFilter>,
    pub aggregations: Vec<Aggregation>,
    pub post_aggregations: Vec<PostAggregation>,
    pub intervals: Vec<Interval>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesQuery {
    pub data_source: DataSource,
    pub granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<QueryFilter>,
    pub aggregations: Vec<Aggregation>,
    pub post_aggregations: Vec<PostAggregation>,
    pub intervals: Vec<Interval>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

/// A complete query ready to post, tagged the way Druid expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "queryType", rename_all = "camelCase")]
pub enum DruidQuery {
    GroupBy(GroupByQuery),
    TopN(TopNQuery),
    Timeseries(TimeseriesQuery),
}

impl DruidQuery {
    pub fn query_type(&self) -> QueryType {
        match self {
            DruidQuery::GroupBy(_) => QueryType::GroupBy,
            DruidQuery::TopN(_) => QueryType::TopN,
            DruidQuery::Timeseries(_) => QueryType::Timeseries,
        }
    }

    pub fn data_source(&self) -> &DataSource {
        match self {
            DruidQuery::GroupBy(query) => &query.data_source,
            DruidQuery::TopN(query) => &query.data_source,
            DruidQuery::Timeseries(query) => &query.data_source,
        }
    }

    /// The granularity of the outermost query.
    pub fn granularity(&self) -> &Granularity {
        match self {
            DruidQuery::GroupBy(query) => &query.granularity,
            DruidQuery::TopN(query) => &query.granularity,
            DruidQuery::Timeseries(query) => &query.granularity,
        }
    }

    pub fn intervals(&self) -> &[Interval] {
        match self {
            DruidQuery::GroupBy(query) => &query.intervals,
            DruidQuery::TopN(query) => &query.intervals,
            DruidQuery::Timeseries(query) => &query.intervals,
        }
    }

    /// The innermost group-by when datasources nest, otherwise `None`.
    pub fn innermost_query(&self) -> Option<&GroupByQuery> {
        match self {
            DruidQuery::GroupBy(query) => Some(innermost(query)),
            DruidQuery::TopN(TopNQuery {
                data_source: DataSource::Query { query },
                ..
            }) => Some(innermost(query)),
            DruidQuery::Timeseries(TimeseriesQuery {
                data_source: DataSource::Query { query },
                ..
            }) => Some(innermost(query)),
            _ => None,
        }
    }
}

fn innermost(query: &GroupByQuery) -> &GroupByQuery {
    let mut current = query;
    while let DataSource::Query { query } = &current.data_source {
        current = query;
    }
    current
}
