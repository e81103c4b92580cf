//! The end-to-end request path: plan, post, parse, paginate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::constraint::QueryPlanningConstraint;
use crate::error::{GranaryError, Result};
use crate::intervals::IntervalSet;
use crate::metric::merged_template;
use crate::pagination::{compute_query_hash, Cursor};
use crate::partial_data::find_missing_time_grain_intervals;
use crate::query::model::DruidQuery;
use crate::query::QueryBuilder;
use crate::request::DataRequest;
use crate::response::ResponseParser;
use crate::result::{ResultSet, ResultSetSchema};

/// Transport to a Druid broker.
///
/// Implementations post the serialized query and hand back the raw JSON
/// response body. Transport failures map into [`GranaryError::Execution`].
#[async_trait]
pub trait DruidWebService: Send + Sync {
    async fn post_query(&self, query: &DruidQuery) -> Result<serde_json::Value>;
}

/// What one data request produced.
#[derive(Debug, Clone)]
pub struct DataResponse {
    /// The parsed rows, cut down to the requested page when the request paged.
    pub results: ResultSet,
    /// Requested intervals the backing tables could not fully serve.
    pub missing_intervals: IntervalSet,
    /// Cursor for the following page, when more rows exist.
    pub next_cursor: Option<String>,
}

/// Runs a bound request end to end against a Druid broker.
pub struct DataService {
    query_builder: QueryBuilder,
    web_service: Arc<dyn DruidWebService>,
    timeout: Duration,
}

impl DataService {
    pub fn new(query_builder: QueryBuilder, web_service: Arc<dyn DruidWebService>) -> Self {
        DataService {
            query_builder,
            web_service,
            timeout: Duration::from_millis(10_000),
        }
    }

    /// Cap on how long a posted query may wait for its response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Plan, post, and parse one request.
    ///
    /// Missing intervals are computed up front from the table group's
    /// availability, so the caller learns about partial data even when the
    /// backend answers normally. Pagination happens after parsing; the next
    /// cursor carries the request fingerprint so a later page can refuse a
    /// cursor minted for a different query.
    pub async fn execute(&self, request: &DataRequest) -> Result<DataResponse> {
        let template = merged_template(request.metrics())?;
        let query = self.query_builder.build_query(request, &template)?;

        let constraint = QueryPlanningConstraint::new(request, &template);
        let missing_intervals = find_missing_time_grain_intervals(
            request.table().group().tables(),
            &constraint,
            constraint.intervals(),
            request.granularity(),
        );
        if !missing_intervals.is_empty() {
            tracing::warn!(
                table = request.table().name(),
                missing = %missing_intervals,
                "backing tables cannot fully serve the requested intervals"
            );
        }

        tracing::info!(
            query_type = query.query_type().name(),
            table = request.table().name(),
            "posting druid query"
        );
        let body = match tokio::time::timeout(self.timeout, self.web_service.post_query(&query))
            .await
        {
            Ok(outcome) => outcome?,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "druid query timed out"
                );
                return Err(GranaryError::Execution(format!(
                    "druid query timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        let schema = ResultSetSchema::from_request(request, &template);
        let results = ResponseParser.parse(&body, &schema, query.query_type())?;
        tracing::info!(rows = results.len(), "parsed druid response");

        let (results, next_cursor) = match request.pagination() {
            None => (results, None),
            Some(pagination) => {
                let next_cursor = if results.has_more(pagination) {
                    let cursor = Cursor::new(pagination.next(), compute_query_hash(request));
                    Some(cursor.encode()?)
                } else {
                    None
                };
                (results.paginate(pagination), next_cursor)
            }
        };

        Ok(DataResponse {
            results,
            missing_intervals,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::Dimension;
    use crate::granularity::TimeGrain;
    use crate::intervals::Interval;
    use crate::metric::{Aggregation, LogicalMetric, MetricTemplate};
    use crate::pagination::PaginationParameters;
    use crate::query::QueryOptions;
    use crate::registry::ResourceDictionaries;
    use crate::request::DataRequestBuilder;
    use crate::resolver::DefaultPhysicalTableResolver;
    use crate::table::{LogicalTable, PhysicalTable, TableGroup};
    use chrono_tz::Tz;
    use serde_json::Value;

    fn availability(raw: &str) -> IntervalSet {
        IntervalSet::new([Interval::parse(raw, Tz::UTC).expect("interval")])
    }

    fn dictionaries(available: &str) -> ResourceDictionaries {
        let page = Arc::new(Dimension::new("page"));
        let views = Arc::new(LogicalMetric::new(
            "views",
            Some(
                MetricTemplate::leaf(vec![Aggregation::long_sum("views", "views")], vec![])
                    .expect("template"),
            ),
        ));
        let physical = Arc::new(
            PhysicalTable::new(
                "pageviews_daily",
                vec!["pageviews".to_string()],
                TimeGrain::Day.zoned(Tz::UTC),
            )
            .expect("physical")
            .with_availability("page", availability(available))
            .with_availability("views", availability(available)),
        );
        let table = Arc::new(LogicalTable::new(
            "pageViews",
            vec![page.clone()],
            ["views"],
            TableGroup::new(vec![physical]),
        ));
        ResourceDictionaries::from_parts(vec![page], vec![views], vec![table])
            .expect("dictionaries")
    }

    fn base<'a>(dictionaries: &'a ResourceDictionaries) -> DataRequestBuilder<'a> {
        DataRequest::builder(dictionaries)
            .table("pageViews")
            .granularity("day")
            .time_zone(None)
            .dimensions(["page"])
            .dimension_fields(vec![])
            .metrics(["views"])
            .intervals(["2024-01-01/2024-01-04"])
            .filters(vec![])
            .havings(vec![])
            .sorts(vec![])
            .date_time_sort(None)
            .count(None)
            .top_n(None)
            .format(None)
            .async_after(None)
            .pagination(None)
            .download_filename(None)
    }

    fn service(web: Arc<dyn DruidWebService>) -> DataService {
        let builder = QueryBuilder::new(
            Arc::new(DefaultPhysicalTableResolver),
            QueryOptions::default(),
        );
        DataService::new(builder, web)
    }

    struct Canned(Value);

    #[async_trait]
    impl DruidWebService for Canned {
        async fn post_query(&self, _query: &DruidQuery) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    struct NeverAnswers;

    #[async_trait]
    impl DruidWebService for NeverAnswers {
        async fn post_query(&self, _query: &DruidQuery) -> Result<Value> {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    fn three_days_of_rows() -> Value {
        serde_json::from_str(
            r#"[
                {"version": "v1", "timestamp": "2024-01-01T00:00:00.000Z",
                 "event": {"page": "rust_lang", "views": 10}},
                {"version": "v1", "timestamp": "2024-01-02T00:00:00.000Z",
                 "event": {"page": "rust_lang", "views": 11}},
                {"version": "v1", "timestamp": "2024-01-03T00:00:00.000Z",
                 "event": {"page": "rust_lang", "views": 12}}
            ]"#,
        )
        .expect("json")
    }

    #[tokio::test]
    async fn executes_a_request_end_to_end() {
        let dicts = dictionaries("2024-01-01/2024-02-01");
        let request = base(&dicts).build().expect("request");
        let service = service(Arc::new(Canned(three_days_of_rows())));

        let response = service.execute(&request).await.expect("response");
        assert_eq!(response.results.len(), 3);
        assert!(response.missing_intervals.is_empty());
        assert!(response.next_cursor.is_none());
    }

    #[tokio::test]
    async fn reports_intervals_the_tables_cannot_serve() {
        let dicts = dictionaries("2024-01-01/2024-01-02");
        let request = base(&dicts).build().expect("request");
        let service = service(Arc::new(Canned(three_days_of_rows())));

        let response = service.execute(&request).await.expect("response");
        assert_eq!(
            response.missing_intervals.to_string(),
            "[2024-01-02T00:00:00.000Z/2024-01-04T00:00:00.000Z]"
        );
    }

    #[tokio::test]
    async fn pages_rows_and_mints_a_matching_cursor() {
        let dicts = dictionaries("2024-01-01/2024-02-01");
        let page_one = PaginationParameters::new(1, 2).expect("pagination");
        let request = base(&dicts)
            .pagination(Some(page_one))
            .build()
            .expect("request");
        let service = service(Arc::new(Canned(three_days_of_rows())));

        let response = service.execute(&request).await.expect("response");
        assert_eq!(response.results.len(), 2);

        let encoded = response.next_cursor.expect("cursor");
        let cursor = Cursor::decode(&encoded).expect("decoded");
        assert_eq!(cursor.pagination().expect("pagination").page(), 2);
        assert!(cursor
            .validate_query_hash(compute_query_hash(&request))
            .is_ok());
    }

    #[tokio::test]
    async fn last_page_carries_no_cursor() {
        let dicts = dictionaries("2024-01-01/2024-02-01");
        let last = PaginationParameters::new(2, 2).expect("pagination");
        let request = base(&dicts)
            .pagination(Some(last))
            .build()
            .expect("request");
        let service = service(Arc::new(Canned(three_days_of_rows())));

        let response = service.execute(&request).await.expect("response");
        assert_eq!(response.results.len(), 1);
        assert!(response.next_cursor.is_none());
    }

    #[tokio::test]
    async fn slow_backends_hit_the_timeout() {
        let dicts = dictionaries("2024-01-01/2024-02-01");
        let request = base(&dicts).build().expect("request");
        let service =
            service(Arc::new(NeverAnswers)).with_timeout(Duration::from_millis(20));

        let err = service.execute(&request).await.expect_err("timeout");
        assert!(matches!(err, GranaryError::Execution(_)));
    }
}
