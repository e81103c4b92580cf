//! Parsing Druid responses into result sets.
//!
//! Druid answers every query shape with a JSON array of records, but the
//! record layout differs by shape: groupBy wraps rows in `event`, topN packs
//! a bucket of rows into a `result` array, timeseries and lookback put a
//! single `result` object per bucket. The parser normalizes all of them into
//! [`ResultSet`] rows against the schema derived from the request.
//!
//! A malformed record envelope fails the whole response; anomalies inside a
//! record (an unknown dimension key, a missing or non-scalar metric) are
//! logged and tolerated, because Druid legitimately omits and pads fields.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{GranaryError, Result};
use crate::query::model::QueryType;
use crate::result::{MetricValue, ResultRow, ResultSet, ResultSetSchema};

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseParser;

impl ResponseParser {
    /// Parse `response` as the given query type against `schema`.
    pub fn parse(
        &self,
        response: &Value,
        schema: &ResultSetSchema,
        query_type: QueryType,
    ) -> Result<ResultSet> {
        let records = response.as_array().ok_or_else(|| {
            GranaryError::Binding("druid response is not a JSON array".to_string())
        })?;
        let rows = match query_type {
            QueryType::GroupBy => self.parse_group_by(records, schema)?,
            QueryType::TopN => self.parse_top_n(records, schema)?,
            QueryType::Timeseries | QueryType::Lookback => {
                self.parse_timeseries(records, schema)?
            }
            other => {
                tracing::error!(query_type = other.name(), "no parser for query type");
                return Err(GranaryError::UnsupportedQueryType(other.name().to_string()));
            }
        };
        Ok(ResultSet::new(schema.clone(), rows))
    }

    fn parse_group_by(
        &self,
        records: &[Value],
        schema: &ResultSetSchema,
    ) -> Result<Vec<ResultRow>> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let timestamp = parse_timestamp(record)?;
            let event = record
                .get("event")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    GranaryError::Binding("groupBy record has no event object".to_string())
                })?;
            rows.push(parse_row(timestamp, event, schema));
        }
        Ok(rows)
    }

    fn parse_top_n(&self, records: &[Value], schema: &ResultSetSchema) -> Result<Vec<ResultRow>> {
        let mut rows = Vec::new();
        for record in records {
            let timestamp = parse_timestamp(record)?;
            let entries = record
                .get("result")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    GranaryError::Binding("topN record has no result array".to_string())
                })?;
            for entry in entries {
                let object = entry.as_object().ok_or_else(|| {
                    GranaryError::Binding("topN result entry is not an object".to_string())
                })?;
                rows.push(parse_row(timestamp, object, schema));
            }
        }
        Ok(rows)
    }

    fn parse_timeseries(
        &self,
        records: &[Value],
        schema: &ResultSetSchema,
    ) -> Result<Vec<ResultRow>> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let timestamp = parse_timestamp(record)?;
            let result = record
                .get("result")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    GranaryError::Binding("timeseries record has no result object".to_string())
                })?;
            rows.push(parse_row(timestamp, result, schema));
        }
        Ok(rows)
    }
}

fn parse_timestamp(record: &Value) -> Result<DateTime<Utc>> {
    let raw = record
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| GranaryError::Binding("druid record has no timestamp".to_string()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| GranaryError::Binding(format!("bad druid timestamp '{}': {}", raw, e)))
}

fn parse_row(
    timestamp: DateTime<Utc>,
    record: &serde_json::Map<String, Value>,
    schema: &ResultSetSchema,
) -> ResultRow {
    let mut row = ResultRow::new(timestamp);
    for dimension in schema.dimension_columns() {
        let key = record
            .get(dimension.api_name())
            .map(key_string)
            .unwrap_or_default();
        let dimension_row = match dimension.find_row_by_key(&key) {
            Some(stored) => stored.clone(),
            None => {
                tracing::debug!(
                    dimension = dimension.api_name(),
                    key = %key,
                    "no stored row for key, synthesizing a placeholder"
                );
                dimension.create_empty_row(&key)
            }
        };
        row.dimension_rows
            .insert(dimension.api_name().to_string(), dimension_row);
    }
    for metric in schema.metric_columns() {
        match record.get(metric) {
            None => {
                tracing::debug!(metric = %metric, "metric column absent from record, skipped");
            }
            Some(value) => {
                row.metric_values
                    .insert(metric.clone(), metric_value(metric, value));
            }
        }
    }
    row
}

/// Dimension keys arrive as strings, but Druid pads missing ones with null
/// and numeric dimensions come back as numbers.
fn key_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn metric_value(name: &str, value: &Value) -> MetricValue {
    match value {
        Value::Null => MetricValue::Null,
        Value::Bool(flag) => MetricValue::Boolean(*flag),
        Value::String(text) => MetricValue::Text(text.clone()),
        Value::Number(number) => {
            let token = number.to_string();
            match token
                .parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(&token))
            {
                Ok(decimal) => MetricValue::Number(decimal),
                Err(_) => {
                    tracing::warn!(metric = %name, value = %token, "number out of decimal range, kept raw");
                    MetricValue::Raw(value.clone())
                }
            }
        }
        other => {
            tracing::warn!(metric = %name, "non-scalar metric value, kept raw");
            MetricValue::Raw(other.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::{Dimension, DimensionRow};
    use crate::granularity::{Granularity, TimeGrain};
    use chrono_tz::Tz;
    use std::sync::Arc;

    fn schema() -> ResultSetSchema {
        let page = Dimension::new("page")
            .with_rows(vec![DimensionRow::from_pairs([
                ("id", "rust_lang"),
                ("desc", "Rust language"),
            ])])
            .expect("rows");
        ResultSetSchema::new(
            Granularity::Grain(TimeGrain::Day.zoned(Tz::UTC)),
            vec![Arc::new(page)],
            vec!["views".to_string(), "daily_avg".to_string()],
        )
    }

    fn value(raw: &str) -> Value {
        serde_json::from_str(raw).expect("json")
    }

    #[test]
    fn group_by_records_become_one_row_each() {
        let response = value(
            r#"[
                {"version": "v1", "timestamp": "2024-01-01T00:00:00.000Z",
                 "event": {"page": "rust_lang", "views": 41, "daily_avg": 5.875}},
                {"version": "v1", "timestamp": "2024-01-02T00:00:00.000Z",
                 "event": {"page": "py_lang", "views": 3, "daily_avg": 0.500}}
            ]"#,
        );
        let set = ResponseParser
            .parse(&response, &schema(), QueryType::GroupBy)
            .expect("parsed");
        assert_eq!(set.len(), 2);

        let first = &set.rows()[0];
        assert_eq!(
            first.dimension_rows["page"].get("desc"),
            Some("Rust language")
        );
        assert_eq!(
            first.metric_values["views"],
            MetricValue::Number(Decimal::from(41))
        );

        // Unknown key: a placeholder row with only the key field set.
        let second = &set.rows()[1];
        assert_eq!(second.dimension_rows["page"].get("id"), Some("py_lang"));
        assert_eq!(second.dimension_rows["page"].get("desc"), Some(""));
        // Trailing zeros survive parsing.
        assert_eq!(
            second.metric_values["daily_avg"]
                .as_decimal()
                .map(|d| d.to_string()),
            Some("0.500".to_string())
        );
    }

    #[test]
    fn top_n_buckets_flatten_into_rows() {
        let response = value(
            r#"[
                {"timestamp": "2024-01-01T00:00:00.000Z", "result": [
                    {"page": "rust_lang", "views": 9},
                    {"page": "py_lang", "views": 7}
                ]},
                {"timestamp": "2024-01-02T00:00:00.000Z", "result": [
                    {"page": "rust_lang", "views": 4}
                ]}
            ]"#,
        );
        let set = ResponseParser
            .parse(&response, &schema(), QueryType::TopN)
            .expect("parsed");
        assert_eq!(set.len(), 3);
        assert_eq!(
            set.rows()[1].metric_values["views"],
            MetricValue::Number(Decimal::from(7))
        );
    }

    #[test]
    fn timeseries_keeps_integers_beyond_f64_exact() {
        let empty = ResultSetSchema::new(
            Granularity::Grain(TimeGrain::Day.zoned(Tz::UTC)),
            vec![],
            vec!["views".to_string()],
        );
        let response = value(
            r#"[{"timestamp": "2024-01-01T00:00:00.000Z",
                 "result": {"views": 9007199254740993}}]"#,
        );
        let set = ResponseParser
            .parse(&response, &empty, QueryType::Timeseries)
            .expect("parsed");
        assert_eq!(
            set.rows()[0].metric_values["views"]
                .as_decimal()
                .map(|d| d.to_string()),
            Some("9007199254740993".to_string())
        );
    }

    #[test]
    fn lookback_results_may_carry_dimensions() {
        let response = value(
            r#"[{"timestamp": "2024-01-01T00:00:00.000Z",
                 "result": {"page": "rust_lang", "views": 12}}]"#,
        );
        let set = ResponseParser
            .parse(&response, &schema(), QueryType::Lookback)
            .expect("parsed");
        assert_eq!(
            set.rows()[0].dimension_rows["page"].get("desc"),
            Some("Rust language")
        );
    }

    #[test]
    fn per_field_anomalies_are_tolerated() {
        let response = value(
            r#"[{"version": "v1", "timestamp": "2024-01-01T00:00:00.000Z",
                 "event": {"page": null, "views": "n/a",
                           "daily_avg": {"unexpected": true}}}]"#,
        );
        let set = ResponseParser
            .parse(&response, &schema(), QueryType::GroupBy)
            .expect("parsed");
        let row = &set.rows()[0];
        // Null dimension key resolves to the empty-key placeholder.
        assert_eq!(row.dimension_rows["page"].get("id"), Some(""));
        assert_eq!(
            row.metric_values["views"],
            MetricValue::Text("n/a".to_string())
        );
        assert!(matches!(
            row.metric_values["daily_avg"],
            MetricValue::Raw(_)
        ));
    }

    #[test]
    fn missing_metric_columns_are_skipped_not_fatal() {
        let response = value(
            r#"[{"version": "v1", "timestamp": "2024-01-01T00:00:00.000Z",
                 "event": {"page": "rust_lang", "views": 1}}]"#,
        );
        let set = ResponseParser
            .parse(&response, &schema(), QueryType::GroupBy)
            .expect("parsed");
        assert!(!set.rows()[0].metric_values.contains_key("daily_avg"));
    }

    #[test]
    fn malformed_envelopes_fail_the_response() {
        let no_event = value(r#"[{"timestamp": "2024-01-01T00:00:00.000Z"}]"#);
        assert!(ResponseParser
            .parse(&no_event, &schema(), QueryType::GroupBy)
            .is_err());

        let bad_timestamp = value(r#"[{"timestamp": "yesterday", "event": {}}]"#);
        assert!(ResponseParser
            .parse(&bad_timestamp, &schema(), QueryType::GroupBy)
            .is_err());

        let not_an_array = value(r#"{"error": "query timeout"}"#);
        assert!(ResponseParser
            .parse(&not_an_array, &schema(), QueryType::GroupBy)
            .is_err());
    }

    #[test]
    fn unhandled_query_types_are_rejected() {
        let response = value("[]");
        let err = ResponseParser
            .parse(&response, &schema(), QueryType::SegmentMetadata)
            .expect_err("unsupported");
        assert!(matches!(err, GranaryError::UnsupportedQueryType(_)));
    }
}
