//! The tabular result model Druid responses parse into.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::dimension::{Dimension, DimensionRow};
use crate::granularity::Granularity;
use crate::metric::MetricTemplate;
use crate::pagination::PaginationParameters;
use crate::request::DataRequest;

/// One metric cell.
///
/// Numbers keep the exact decimal digits of the JSON token they were parsed
/// from; a value the parser cannot place lands in `Raw` untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(Decimal),
    Text(String),
    Boolean(bool),
    Null,
    Raw(serde_json::Value),
}

impl MetricValue {
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            MetricValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MetricValue::Null)
    }
}

/// One output row: a time bucket, the dimension rows it grouped by, and the
/// metric values computed for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub timestamp: DateTime<Utc>,
    pub dimension_rows: BTreeMap<String, DimensionRow>,
    pub metric_values: BTreeMap<String, MetricValue>,
}

impl ResultRow {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        ResultRow {
            timestamp,
            dimension_rows: BTreeMap::new(),
            metric_values: BTreeMap::new(),
        }
    }
}

/// The columns a response is expected to carry.
#[derive(Debug, Clone)]
pub struct ResultSetSchema {
    granularity: Granularity,
    dimension_columns: Vec<Arc<Dimension>>,
    metric_columns: Vec<String>,
}

impl ResultSetSchema {
    pub fn new(
        granularity: Granularity,
        dimension_columns: Vec<Arc<Dimension>>,
        metric_columns: Vec<String>,
    ) -> Self {
        ResultSetSchema {
            granularity,
            dimension_columns,
            metric_columns,
        }
    }

    /// Columns for a bound request: its grouped dimensions plus every output
    /// the merged template's outermost level emits.
    pub fn from_request(request: &DataRequest, template: &MetricTemplate) -> Self {
        ResultSetSchema {
            granularity: *request.granularity(),
            dimension_columns: request.dimensions().to_vec(),
            metric_columns: template.output_names(),
        }
    }

    pub fn granularity(&self) -> &Granularity {
        &self.granularity
    }

    pub fn dimension_columns(&self) -> &[Arc<Dimension>] {
        &self.dimension_columns
    }

    pub fn dimension(&self, api_name: &str) -> Option<&Arc<Dimension>> {
        self.dimension_columns
            .iter()
            .find(|d| d.api_name() == api_name)
    }

    pub fn metric_columns(&self) -> &[String] {
        &self.metric_columns
    }
}

/// Parsed rows together with the schema they satisfy.
#[derive(Debug, Clone)]
pub struct ResultSet {
    schema: ResultSetSchema,
    rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn new(schema: ResultSetSchema, rows: Vec<ResultRow>) -> Self {
        ResultSet { schema, rows }
    }

    pub fn schema(&self) -> &ResultSetSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The requested window of rows. A page past the end is empty, not an
    /// error.
    pub fn paginate(&self, pagination: &PaginationParameters) -> ResultSet {
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        let per_page = usize::try_from(pagination.per_page()).unwrap_or(usize::MAX);
        let rows = self
            .rows
            .iter()
            .skip(offset)
            .take(per_page)
            .cloned()
            .collect();
        ResultSet {
            schema: self.schema.clone(),
            rows,
        }
    }

    /// Whether rows remain past the given page.
    pub fn has_more(&self, pagination: &PaginationParameters) -> bool {
        let consumed = pagination.offset().saturating_add(pagination.per_page());
        (self.rows.len() as u64) > consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Tz;

    fn rows(count: usize) -> Vec<ResultRow> {
        (0..count)
            .map(|hour| {
                let timestamp = Utc
                    .with_ymd_and_hms(2024, 1, 1, hour as u32, 0, 0)
                    .single()
                    .expect("timestamp");
                let mut row = ResultRow::new(timestamp);
                row.metric_values
                    .insert("views".to_string(), MetricValue::Number(Decimal::from(hour)));
                row
            })
            .collect()
    }

    fn schema() -> ResultSetSchema {
        ResultSetSchema::new(
            Granularity::All(Tz::UTC),
            vec![],
            vec!["views".to_string()],
        )
    }

    #[test]
    fn paginate_windows_the_rows() {
        let set = ResultSet::new(schema(), rows(10));
        let page = set.paginate(&PaginationParameters::new(2, 3).expect("pagination"));
        assert_eq!(page.len(), 3);
        assert_eq!(
            page.rows()[0].metric_values["views"],
            MetricValue::Number(Decimal::from(3))
        );
        assert!(set.has_more(&PaginationParameters::new(2, 3).expect("pagination")));
    }

    #[test]
    fn the_last_page_may_be_short_and_beyond_it_is_empty() {
        let set = ResultSet::new(schema(), rows(10));
        let last = set.paginate(&PaginationParameters::new(4, 3).expect("pagination"));
        assert_eq!(last.len(), 1);
        assert!(!set.has_more(&PaginationParameters::new(4, 3).expect("pagination")));
        let past = set.paginate(&PaginationParameters::new(9, 3).expect("pagination"));
        assert!(past.is_empty());
    }

    #[test]
    fn metric_values_expose_decimals() {
        let number = MetricValue::Number(Decimal::new(1005, 1));
        assert_eq!(number.as_decimal(), Some(Decimal::new(1005, 1)));
        assert!(MetricValue::Null.is_null());
        assert_eq!(MetricValue::Text("x".to_string()).as_decimal(), None);
    }
}
