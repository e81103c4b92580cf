//! Integration tests for Druid query JSON rendering.
//!
//! These tests build query structures directly and check the exact wire
//! format they serialize to.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono_tz::Tz;
use granary::granularity::{Granularity, TimeGrain};
use granary::intervals::Interval;
use granary::metric::{Aggregation, ArithmeticFn, PostAggregation};
use granary::query::model::{
    DataSource, DruidQuery, GroupByQuery, HavingSpec, LimitSpec, OrderByColumn, QueryDirection,
    QueryFilter, TopNMetricSpec, TopNQuery,
};
use rust_decimal::Decimal;
use serde_json::json;

fn interval(raw: &str) -> Interval {
    Interval::parse(raw, Tz::UTC).expect("interval")
}

fn day() -> Granularity {
    Granularity::Grain(TimeGrain::Day.zoned(Tz::UTC))
}

fn leaf() -> GroupByQuery {
    GroupByQuery {
        data_source: DataSource::from_names(&["pageviews".to_string()]),
        dimensions: vec!["page".to_string()],
        granularity: day(),
        filter: Some(QueryFilter::selector("page", "rust_lang")),
        aggregations: vec![Aggregation::long_sum("views", "views")],
        post_aggregations: vec![],
        having: None,
        limit_spec: None,
        intervals: vec![interval("2024-01-01/2024-01-08")],
        context: BTreeMap::new(),
    }
}

#[test]
fn renders_a_nested_group_by_exactly() {
    let outer = DruidQuery::GroupBy(GroupByQuery {
        data_source: DataSource::nested(leaf()),
        dimensions: vec!["page".to_string()],
        granularity: Granularity::Grain(TimeGrain::Week.zoned(Tz::UTC)),
        filter: None,
        aggregations: vec![
            Aggregation::long_sum("views_total", "views"),
            Aggregation::count("days"),
        ],
        post_aggregations: vec![PostAggregation::arithmetic(
            "daily_avg_views",
            ArithmeticFn::Divide,
            vec![
                PostAggregation::field_access("views_total"),
                PostAggregation::field_access("days"),
            ],
        )],
        having: HavingSpec::and(vec![
            HavingSpec::greater_than("daily_avg_views", Decimal::from(10)),
            HavingSpec::not(HavingSpec::equal_to("days", Decimal::from(0))),
        ]),
        limit_spec: Some(LimitSpec::Default {
            columns: vec![OrderByColumn::new("daily_avg_views", QueryDirection::Descending)],
            limit: Some(25),
        }),
        intervals: vec![interval("2024-01-01/2024-01-08")],
        context: BTreeMap::new(),
    });

    assert_eq!(
        serde_json::to_value(&outer).expect("json"),
        json!({
            "queryType": "groupBy",
            "dataSource": {
                "type": "query",
                "query": {
                    "dataSource": {"type": "table", "name": "pageviews"},
                    "dimensions": ["page"],
                    "granularity": {"type": "period", "period": "P1D", "timeZone": "UTC"},
                    "filter": {"type": "selector", "dimension": "page", "value": "rust_lang"},
                    "aggregations": [
                        {"name": "views", "type": "longSum", "fieldName": "views"}
                    ],
                    "postAggregations": [],
                    "intervals": ["2024-01-01T00:00:00.000Z/2024-01-08T00:00:00.000Z"]
                }
            },
            "dimensions": ["page"],
            "granularity": {"type": "period", "period": "P1W", "timeZone": "UTC"},
            "aggregations": [
                {"name": "views_total", "type": "longSum", "fieldName": "views"},
                {"name": "days", "type": "count"}
            ],
            "postAggregations": [{
                "type": "arithmetic",
                "name": "daily_avg_views",
                "fn": "/",
                "fields": [
                    {"type": "fieldAccess", "fieldName": "views_total"},
                    {"type": "fieldAccess", "fieldName": "days"}
                ]
            }],
            "having": {
                "type": "and",
                "havingSpecs": [
                    {"type": "greaterThan", "aggregation": "daily_avg_views", "value": 10},
                    {"type": "not", "havingSpec": {
                        "type": "equalTo", "aggregation": "days", "value": 0
                    }}
                ]
            },
            "limitSpec": {
                "type": "default",
                "columns": [{"dimension": "daily_avg_views", "direction": "descending"}],
                "limit": 25
            },
            "intervals": ["2024-01-01T00:00:00.000Z/2024-01-08T00:00:00.000Z"]
        })
    );

    // The nesting helper walks back down to the leaf.
    assert_eq!(outer.innermost_query(), Some(&leaf()));
}

#[test]
fn renders_top_n_with_an_inverted_metric_for_ascending_sorts() {
    let query = DruidQuery::TopN(TopNQuery {
        data_source: DataSource::from_names(&["pageviews".to_string()]),
        dimension: "page".to_string(),
        metric: TopNMetricSpec::for_sort("views", granary::request::SortDirection::Asc),
        threshold: 5,
        granularity: day(),
        filter: None,
        aggregations: vec![Aggregation::long_sum("views", "views")],
        post_aggregations: vec![],
        intervals: vec![interval("2024-01-01/2024-01-02")],
        context: BTreeMap::new(),
    });

    let value = serde_json::to_value(&query).expect("json");
    assert_eq!(value["queryType"], json!("topN"));
    assert_eq!(
        value["metric"],
        json!({"type": "inverted", "metric": {"type": "numeric", "metric": "views"}})
    );
    assert_eq!(value["threshold"], json!(5));
}

#[test]
fn decimal_values_render_with_their_written_scale() {
    let having = HavingSpec::greater_than("ctr", Decimal::from_str("0.1").unwrap());
    let rendered = serde_json::to_string(&having).unwrap();
    assert!(rendered.contains("\"value\":0.1"), "got {rendered}");

    let constant = PostAggregation::constant("half", Decimal::from_str("0.500").unwrap());
    let rendered = serde_json::to_string(&constant).unwrap();
    assert!(rendered.contains("\"value\":0.500"), "got {rendered}");
}

#[test]
fn context_is_omitted_from_the_wire_when_empty() {
    let bare = serde_json::to_value(DruidQuery::GroupBy(leaf())).expect("json");
    assert_eq!(bare.get("context"), None);

    let mut with_context = leaf();
    with_context
        .context
        .insert("timeout".to_string(), json!(10_000));
    let value = serde_json::to_value(DruidQuery::GroupBy(with_context)).expect("json");
    assert_eq!(value["context"], json!({"timeout": 10_000}));
}
