//! The immutable analytical request and its binding builder.
//!
//! A [`DataRequest`] is a value object: once built it is never mutated, and
//! the planner derives everything else from it. Construction goes through
//! [`DataRequestBuilder`], which records raw inputs one setter at a time and
//! refuses to bind until every field has been explicitly provided, even when
//! the provided value is `None`. Binding resolves names against the resource
//! dictionaries and applies every cross-field validation rule in one place.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::dimension::Dimension;
use crate::error::{GranaryError, Result};
use crate::granularity::Granularity;
use crate::intervals::Interval;
use crate::metric::LogicalMetric;
use crate::pagination::PaginationParameters;
use crate::registry::ResourceDictionaries;
use crate::table::LogicalTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A metric sort. Time sorts are carried separately on the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub column: String,
    pub direction: SortDirection,
}

impl OrderItem {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        OrderItem {
            column: column.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    In,
    NotIn,
    Eq,
    StartsWith,
    Contains,
}

impl FilterOp {
    /// Inclusive operations name the admitted keys outright. Only these are
    /// allowed on non-aggregatable dimensions.
    pub fn is_inclusive(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::Eq)
    }
}

/// One filter clause against a dimension field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiFilter {
    pub dimension: String,
    pub field: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

impl ApiFilter {
    pub fn new(
        dimension: impl Into<String>,
        field: impl Into<String>,
        op: FilterOp,
        values: Vec<String>,
    ) -> Self {
        ApiFilter {
            dimension: dimension.into(),
            field: field.into(),
            op,
            values,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HavingOp {
    Eq,
    Gt,
    Lt,
    GtEq,
    LtEq,
}

/// One having clause against an aggregated metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiHaving {
    pub metric: String,
    pub op: HavingOp,
    pub values: Vec<Decimal>,
}

impl ApiHaving {
    pub fn new(metric: impl Into<String>, op: HavingOp, values: Vec<Decimal>) -> Self {
        ApiHaving {
            metric: metric.into(),
            op,
            values,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Csv,
    Debug,
}

impl FromStr for ResponseFormat {
    type Err = GranaryError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "json" => Ok(ResponseFormat::Json),
            "csv" => Ok(ResponseFormat::Csv),
            "debug" => Ok(ResponseFormat::Debug),
            other => Err(GranaryError::Binding(format!(
                "unknown response format '{}'",
                other
            ))),
        }
    }
}

/// When a request may switch to asynchronous delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsyncAfter {
    Always,
    #[default]
    Never,
    Millis(u64),
}

impl FromStr for AsyncAfter {
    type Err = GranaryError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "always" => Ok(AsyncAfter::Always),
            "never" => Ok(AsyncAfter::Never),
            millis => millis
                .parse::<u64>()
                .map(AsyncAfter::Millis)
                .map_err(|_| {
                    GranaryError::Binding(format!(
                        "asyncAfter must be 'always', 'never', or milliseconds, got '{}'",
                        millis
                    ))
                }),
        }
    }
}

/// A fully bound, validated analytical request.
#[derive(Debug, Clone)]
pub struct DataRequest {
    table: Arc<LogicalTable>,
    granularity: Granularity,
    dimensions: Vec<Arc<Dimension>>,
    dimension_fields: BTreeMap<String, Vec<String>>,
    metrics: Vec<Arc<LogicalMetric>>,
    intervals: Vec<Interval>,
    filters: BTreeMap<String, Vec<ApiFilter>>,
    havings: BTreeMap<String, Vec<ApiHaving>>,
    sorts: Vec<OrderItem>,
    date_time_sort: Option<SortDirection>,
    count: Option<u64>,
    top_n: Option<u64>,
    time_zone: Tz,
    format: ResponseFormat,
    async_after: AsyncAfter,
    pagination: Option<PaginationParameters>,
    download_filename: Option<String>,
}

impl DataRequest {
    pub fn builder(dictionaries: &ResourceDictionaries) -> DataRequestBuilder<'_> {
        DataRequestBuilder::new(dictionaries)
    }

    pub fn table(&self) -> &Arc<LogicalTable> {
        &self.table
    }

    pub fn granularity(&self) -> &Granularity {
        &self.granularity
    }

    pub fn dimensions(&self) -> &[Arc<Dimension>] {
        &self.dimensions
    }

    /// Output fields per grouped dimension, already defaulted.
    pub fn dimension_fields(&self) -> &BTreeMap<String, Vec<String>> {
        &self.dimension_fields
    }

    pub fn metrics(&self) -> &[Arc<LogicalMetric>] {
        &self.metrics
    }

    pub fn metric_names(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn filters(&self) -> &BTreeMap<String, Vec<ApiFilter>> {
        &self.filters
    }

    pub fn filter_dimension_names(&self) -> BTreeSet<String> {
        self.filters.keys().cloned().collect()
    }

    pub fn havings(&self) -> &BTreeMap<String, Vec<ApiHaving>> {
        &self.havings
    }

    pub fn sorts(&self) -> &[OrderItem] {
        &self.sorts
    }

    pub fn date_time_sort(&self) -> Option<SortDirection> {
        self.date_time_sort
    }

    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn top_n(&self) -> Option<u64> {
        self.top_n
    }

    pub fn time_zone(&self) -> Tz {
        self.time_zone
    }

    pub fn format(&self) -> ResponseFormat {
        self.format
    }

    pub fn async_after(&self) -> AsyncAfter {
        self.async_after
    }

    pub fn pagination(&self) -> Option<&PaginationParameters> {
        self.pagination.as_ref()
    }

    pub fn download_filename(&self) -> Option<&str> {
        self.download_filename.as_deref()
    }

    /// A copy with different intervals, re-validated against the granularity.
    pub fn with_intervals(&self, intervals: Vec<Interval>) -> Result<DataRequest> {
        validate_intervals(&intervals, &self.granularity)?;
        let mut request = self.clone();
        request.intervals = intervals;
        Ok(request)
    }

    pub fn with_format(&self, format: ResponseFormat) -> DataRequest {
        let mut request = self.clone();
        request.format = format;
        request
    }

    pub fn with_pagination(&self, pagination: Option<PaginationParameters>) -> DataRequest {
        let mut request = self.clone();
        request.pagination = pagination;
        request
    }
}

fn validate_intervals(intervals: &[Interval], granularity: &Granularity) -> Result<()> {
    if intervals.is_empty() {
        return Err(GranaryError::Binding(
            "at least one interval is required".to_string(),
        ));
    }
    for interval in intervals {
        if !granularity.aligns(interval) {
            return Err(GranaryError::Binding(format!(
                "interval {} does not align to granularity '{}'",
                interval, granularity
            )));
        }
    }
    Ok(())
}

/// Collects raw inputs and binds them against the dictionaries.
///
/// Every field has to be set exactly once before [`build`](Self::build) will
/// run; the builder reports all unset fields together rather than the first.
pub struct DataRequestBuilder<'a> {
    dictionaries: &'a ResourceDictionaries,
    table: Option<String>,
    granularity: Option<String>,
    time_zone: Option<Option<String>>,
    dimensions: Option<Vec<String>>,
    dimension_fields: Option<Vec<(String, Vec<String>)>>,
    metrics: Option<Vec<String>>,
    intervals: Option<Vec<String>>,
    filters: Option<Vec<ApiFilter>>,
    havings: Option<Vec<ApiHaving>>,
    sorts: Option<Vec<OrderItem>>,
    date_time_sort: Option<Option<SortDirection>>,
    count: Option<Option<u64>>,
    top_n: Option<Option<u64>>,
    format: Option<Option<String>>,
    async_after: Option<Option<String>>,
    pagination: Option<Option<PaginationParameters>>,
    download_filename: Option<Option<String>>,
}

impl<'a> DataRequestBuilder<'a> {
    pub fn new(dictionaries: &'a ResourceDictionaries) -> Self {
        DataRequestBuilder {
            dictionaries,
            table: None,
            granularity: None,
            time_zone: None,
            dimensions: None,
            dimension_fields: None,
            metrics: None,
            intervals: None,
            filters: None,
            havings: None,
            sorts: None,
            date_time_sort: None,
            count: None,
            top_n: None,
            format: None,
            async_after: None,
            pagination: None,
            download_filename: None,
        }
    }

    pub fn table(mut self, name: &str) -> Self {
        self.table = Some(name.to_string());
        self
    }

    pub fn granularity(mut self, name: &str) -> Self {
        self.granularity = Some(name.to_string());
        self
    }

    /// `None` binds as UTC.
    pub fn time_zone(mut self, zone: Option<&str>) -> Self {
        self.time_zone = Some(zone.map(str::to_string));
        self
    }

    pub fn dimensions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn dimension_fields(mut self, entries: Vec<(String, Vec<String>)>) -> Self {
        self.dimension_fields = Some(entries);
        self
    }

    pub fn metrics<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metrics = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn intervals<I, S>(mut self, raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intervals = Some(raw.into_iter().map(Into::into).collect());
        self
    }

    pub fn filters(mut self, filters: Vec<ApiFilter>) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn havings(mut self, havings: Vec<ApiHaving>) -> Self {
        self.havings = Some(havings);
        self
    }

    pub fn sorts(mut self, sorts: Vec<OrderItem>) -> Self {
        self.sorts = Some(sorts);
        self
    }

    pub fn date_time_sort(mut self, direction: Option<SortDirection>) -> Self {
        self.date_time_sort = Some(direction);
        self
    }

    pub fn count(mut self, count: Option<u64>) -> Self {
        self.count = Some(count);
        self
    }

    pub fn top_n(mut self, top_n: Option<u64>) -> Self {
        self.top_n = Some(top_n);
        self
    }

    /// `None` binds as JSON.
    pub fn format(mut self, format: Option<&str>) -> Self {
        self.format = Some(format.map(str::to_string));
        self
    }

    /// `None` binds as never-async.
    pub fn async_after(mut self, raw: Option<&str>) -> Self {
        self.async_after = Some(raw.map(str::to_string));
        self
    }

    pub fn pagination(mut self, pagination: Option<PaginationParameters>) -> Self {
        self.pagination = Some(pagination);
        self
    }

    pub fn download_filename(mut self, filename: Option<&str>) -> Self {
        self.download_filename = Some(filename.map(str::to_string));
        self
    }

    pub fn build(self) -> Result<DataRequest> {
        self.check_completeness()?;
        // Every field is Some past this point.
        let time_zone = bind_time_zone(self.time_zone.unwrap_or_default())?;
        let format = match self.format.unwrap_or_default() {
            Some(raw) => ResponseFormat::from_str(&raw)?,
            None => ResponseFormat::default(),
        };
        let async_after = match self.async_after.unwrap_or_default() {
            Some(raw) => AsyncAfter::from_str(&raw)?,
            None => AsyncAfter::default(),
        };
        let granularity =
            Granularity::from_name(&self.granularity.unwrap_or_default(), time_zone)?;

        let table_name = self.table.unwrap_or_default();
        let table = self.dictionaries.table(&table_name).ok_or_else(|| {
            GranaryError::Binding(format!("unknown logical table '{}'", table_name))
        })?;

        let dimensions =
            bind_dimensions(self.dictionaries, &table, &self.dimensions.unwrap_or_default())?;
        let dimension_fields = bind_dimension_fields(
            &dimensions,
            self.dimension_fields.unwrap_or_default(),
        )?;
        let metrics =
            bind_metrics(self.dictionaries, &table, &self.metrics.unwrap_or_default())?;

        let mut intervals = Vec::new();
        for raw in self.intervals.unwrap_or_default() {
            intervals.push(Interval::parse(&raw, time_zone)?);
        }
        validate_intervals(&intervals, &granularity)?;

        let filters = bind_filters(&table, self.filters.unwrap_or_default())?;
        let havings = bind_havings(&metrics, self.havings.unwrap_or_default())?;
        let sorts = bind_sorts(&metrics, self.sorts.unwrap_or_default())?;

        let count = self.count.unwrap_or_default();
        if count == Some(0) {
            return Err(GranaryError::Binding("count must be positive".to_string()));
        }
        let top_n = self.top_n.unwrap_or_default();
        if top_n == Some(0) {
            return Err(GranaryError::Binding("topN must be positive".to_string()));
        }
        if top_n.is_some() && sorts.is_empty() {
            return Err(GranaryError::Binding(
                "topN requires at least one metric sort".to_string(),
            ));
        }

        Ok(DataRequest {
            table,
            granularity,
            dimensions,
            dimension_fields,
            metrics,
            intervals,
            filters,
            havings,
            sorts,
            date_time_sort: self.date_time_sort.unwrap_or_default(),
            count,
            top_n,
            time_zone,
            format,
            async_after,
            pagination: self.pagination.unwrap_or_default(),
            download_filename: self.download_filename.unwrap_or_default(),
        })
    }

    fn check_completeness(&self) -> Result<()> {
        let mut unset = Vec::new();
        macro_rules! require {
            ($field:ident) => {
                if self.$field.is_none() {
                    unset.push(stringify!($field));
                }
            };
        }
        require!(table);
        require!(granularity);
        require!(time_zone);
        require!(dimensions);
        require!(dimension_fields);
        require!(metrics);
        require!(intervals);
        require!(filters);
        require!(havings);
        require!(sorts);
        require!(date_time_sort);
        require!(count);
        require!(top_n);
        require!(format);
        require!(async_after);
        require!(pagination);
        require!(download_filename);
        if unset.is_empty() {
            Ok(())
        } else {
            Err(GranaryError::Binding(format!(
                "request fields not set: {}",
                unset.join(", ")
            )))
        }
    }
}

fn bind_time_zone(raw: Option<String>) -> Result<Tz> {
    match raw {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| GranaryError::Binding(format!("unknown time zone '{}'", name))),
    }
}

fn bind_dimensions(
    dictionaries: &ResourceDictionaries,
    table: &Arc<LogicalTable>,
    names: &[String],
) -> Result<Vec<Arc<Dimension>>> {
    let mut seen = BTreeSet::new();
    let mut dimensions = Vec::new();
    for name in names {
        if !seen.insert(name.clone()) {
            continue;
        }
        let dimension = dictionaries
            .dimension(name)
            .ok_or_else(|| GranaryError::Binding(format!("unknown dimension '{}'", name)))?;
        if !table.has_dimension(name) {
            return Err(GranaryError::Binding(format!(
                "dimension '{}' is not on logical table '{}'",
                name,
                table.name()
            )));
        }
        dimensions.push(dimension);
    }
    Ok(dimensions)
}

fn bind_dimension_fields(
    dimensions: &[Arc<Dimension>],
    entries: Vec<(String, Vec<String>)>,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut requested: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (dimension_name, fields) in entries {
        let dimension = dimensions
            .iter()
            .find(|d| d.api_name() == dimension_name)
            .ok_or_else(|| {
                GranaryError::Binding(format!(
                    "dimension fields given for '{}', which is not grouped",
                    dimension_name
                ))
            })?;
        for field in &fields {
            if !dimension.has_field(field) {
                return Err(GranaryError::Binding(format!(
                    "dimension '{}' has no field '{}'",
                    dimension_name, field
                )));
            }
        }
        if requested.insert(dimension_name.clone(), fields).is_some() {
            return Err(GranaryError::Binding(format!(
                "dimension fields given twice for '{}'",
                dimension_name
            )));
        }
    }
    // Every grouped dimension gets a concrete field list, defaulted when the
    // request named none.
    let mut bound = BTreeMap::new();
    for dimension in dimensions {
        let fields = match requested.remove(dimension.api_name()) {
            Some(fields) if !fields.is_empty() => fields,
            _ => dimension.default_fields().to_vec(),
        };
        bound.insert(dimension.api_name().to_string(), fields);
    }
    Ok(bound)
}

fn bind_metrics(
    dictionaries: &ResourceDictionaries,
    table: &Arc<LogicalTable>,
    names: &[String],
) -> Result<Vec<Arc<LogicalMetric>>> {
    let mut seen = BTreeSet::new();
    let mut metrics = Vec::new();
    for name in names {
        if !seen.insert(name.clone()) {
            continue;
        }
        let metric = dictionaries
            .metric(name)
            .ok_or_else(|| GranaryError::Binding(format!("unknown metric '{}'", name)))?;
        if !table.has_metric(name) {
            return Err(GranaryError::Binding(format!(
                "metric '{}' is not on logical table '{}'",
                name,
                table.name()
            )));
        }
        metrics.push(metric);
    }
    Ok(metrics)
}

fn bind_filters(
    table: &Arc<LogicalTable>,
    filters: Vec<ApiFilter>,
) -> Result<BTreeMap<String, Vec<ApiFilter>>> {
    let mut bound: BTreeMap<String, Vec<ApiFilter>> = BTreeMap::new();
    for filter in filters {
        let dimension = table.dimension(&filter.dimension).ok_or_else(|| {
            GranaryError::Binding(format!(
                "filter dimension '{}' is not on logical table '{}'",
                filter.dimension,
                table.name()
            ))
        })?;
        if !dimension.has_field(&filter.field) {
            return Err(GranaryError::Binding(format!(
                "dimension '{}' has no field '{}'",
                filter.dimension, filter.field
            )));
        }
        if filter.values.is_empty() {
            return Err(GranaryError::Binding(format!(
                "filter on '{}' needs at least one value",
                filter.dimension
            )));
        }
        bound.entry(filter.dimension.clone()).or_default().push(filter);
    }
    for (dimension_name, clauses) in &bound {
        let dimension = table.dimension(dimension_name).ok_or_else(|| {
            GranaryError::Binding(format!("unknown dimension '{}'", dimension_name))
        })?;
        if !dimension.is_aggregatable()
            && (clauses.len() != 1 || !clauses[0].op.is_inclusive())
        {
            return Err(GranaryError::Binding(format!(
                "non-aggregatable dimension '{}' must be filtered by exactly one inclusive clause",
                dimension_name
            )));
        }
    }
    Ok(bound)
}

fn bind_havings(
    metrics: &[Arc<LogicalMetric>],
    havings: Vec<ApiHaving>,
) -> Result<BTreeMap<String, Vec<ApiHaving>>> {
    let mut bound: BTreeMap<String, Vec<ApiHaving>> = BTreeMap::new();
    for having in havings {
        if !metrics.iter().any(|m| m.name == having.metric) {
            return Err(GranaryError::Binding(format!(
                "having on '{}', which is not a requested metric",
                having.metric
            )));
        }
        if having.values.is_empty() {
            return Err(GranaryError::Binding(format!(
                "having on '{}' needs at least one value",
                having.metric
            )));
        }
        bound.entry(having.metric.clone()).or_default().push(having);
    }
    Ok(bound)
}

fn bind_sorts(metrics: &[Arc<LogicalMetric>], sorts: Vec<OrderItem>) -> Result<Vec<OrderItem>> {
    let mut seen = BTreeSet::new();
    for sort in &sorts {
        if !metrics.iter().any(|m| m.name == sort.column) {
            return Err(GranaryError::Binding(format!(
                "sort on '{}', which is not a requested metric",
                sort.column
            )));
        }
        if !seen.insert(sort.column.clone()) {
            return Err(GranaryError::Binding(format!(
                "duplicate sort on '{}'",
                sort.column
            )));
        }
    }
    Ok(sorts)
}
