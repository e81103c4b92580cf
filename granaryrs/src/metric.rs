//! Logical metrics and the aggregation templates that compute them.
//!
//! A metric template describes one backend aggregation pass: its aggregators,
//! its post-aggregators, and optionally a grain override. Multi-pass metrics
//! (for example a daily average rolled up monthly) chain templates through
//! [`TemplateSource::Nested`]; the innermost node is the only one that reads
//! physical columns.

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{GranaryError, Result};
use crate::granularity::TimeGrain;

/// Backend aggregator kinds the planner can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationKind {
    Count,
    LongSum,
    DoubleSum,
    LongMin,
    LongMax,
    DoubleMin,
    DoubleMax,
}

/// A single aggregator: output name, kind, and the column it reads.
/// `count` reads no column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Aggregation {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AggregationKind,
    #[serde(rename = "fieldName", default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
}

impl Aggregation {
    pub fn new(
        name: impl Into<String>,
        kind: AggregationKind,
        field_name: Option<String>,
    ) -> Self {
        Aggregation {
            name: name.into(),
            kind,
            field_name,
        }
    }

    pub fn count(name: impl Into<String>) -> Self {
        Aggregation::new(name, AggregationKind::Count, None)
    }

    pub fn long_sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Aggregation::new(name, AggregationKind::LongSum, Some(field.into()))
    }

    pub fn double_sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Aggregation::new(name, AggregationKind::DoubleSum, Some(field.into()))
    }

    pub fn long_max(name: impl Into<String>, field: impl Into<String>) -> Self {
        Aggregation::new(name, AggregationKind::LongMax, Some(field.into()))
    }
}

/// Arithmetic operator of an arithmetic post-aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticFn {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
}

/// A post-aggregator: computed after aggregation, over aggregator outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PostAggregation {
    Arithmetic {
        name: String,
        #[serde(rename = "fn")]
        func: ArithmeticFn,
        fields: Vec<PostAggregation>,
    },
    FieldAccess {
        #[serde(rename = "fieldName")]
        field_name: String,
    },
    Constant { name: String, value: Decimal },
}

impl PostAggregation {
    pub fn arithmetic(
        name: impl Into<String>,
        func: ArithmeticFn,
        fields: Vec<PostAggregation>,
    ) -> Self {
        PostAggregation::Arithmetic {
            name: name.into(),
            func,
            fields,
        }
    }

    pub fn field_access(field_name: impl Into<String>) -> Self {
        PostAggregation::FieldAccess {
            field_name: field_name.into(),
        }
    }

    pub fn constant(name: impl Into<String>, value: Decimal) -> Self {
        PostAggregation::Constant {
            name: name.into(),
            value,
        }
    }

    /// The column this node contributes to the output, when it has one.
    /// Field accesses are addressing nodes and contribute none.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            PostAggregation::Arithmetic { name, .. } => Some(name),
            PostAggregation::Constant { name, .. } => Some(name),
            PostAggregation::FieldAccess { .. } => None,
        }
    }
}

/// Where a template node draws its rows from: the resolved physical table,
/// or another aggregation pass beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Table,
    Nested(Box<MetricTemplate>),
}

/// One aggregation pass, possibly stacked on an inner pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTemplate", into = "RawTemplate")]
pub struct MetricTemplate {
    aggregations: Vec<Aggregation>,
    post_aggregations: Vec<PostAggregation>,
    time_grain: Option<TimeGrain>,
    source: TemplateSource,
}

impl MetricTemplate {
    /// A single-pass template reading the physical table.
    pub fn leaf(
        aggregations: Vec<Aggregation>,
        post_aggregations: Vec<PostAggregation>,
    ) -> Result<Self> {
        Self::build(aggregations, post_aggregations, None, TemplateSource::Table)
    }

    /// A template whose rows come from `inner`'s output.
    pub fn nested(
        aggregations: Vec<Aggregation>,
        post_aggregations: Vec<PostAggregation>,
        inner: MetricTemplate,
    ) -> Result<Self> {
        Self::build(
            aggregations,
            post_aggregations,
            None,
            TemplateSource::Nested(Box::new(inner)),
        )
    }

    fn build(
        aggregations: Vec<Aggregation>,
        post_aggregations: Vec<PostAggregation>,
        time_grain: Option<TimeGrain>,
        source: TemplateSource,
    ) -> Result<Self> {
        if aggregations.is_empty() && post_aggregations.is_empty() {
            return Err(GranaryError::Binding(
                "a metric template node must define at least one aggregation".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for name in aggregations.iter().map(|a| a.name.as_str()).chain(
            post_aggregations
                .iter()
                .filter_map(PostAggregation::output_name),
        ) {
            if !seen.insert(name) {
                return Err(GranaryError::Binding(format!(
                    "metric template defines output '{}' more than once",
                    name
                )));
            }
        }
        for post in &post_aggregations {
            if post.output_name().is_none() {
                return Err(GranaryError::Binding(
                    "top-level post-aggregations must be named".to_string(),
                ));
            }
        }
        Ok(MetricTemplate {
            aggregations,
            post_aggregations,
            time_grain,
            source,
        })
    }

    /// Override the grain of this pass. Zoneless: the request time zone is
    /// applied when the query is built.
    pub fn with_time_grain(mut self, grain: TimeGrain) -> Self {
        self.time_grain = Some(grain);
        self
    }

    pub fn aggregations(&self) -> &[Aggregation] {
        &self.aggregations
    }

    pub fn post_aggregations(&self) -> &[PostAggregation] {
        &self.post_aggregations
    }

    pub fn time_grain(&self) -> Option<TimeGrain> {
        self.time_grain
    }

    pub fn inner(&self) -> Option<&MetricTemplate> {
        match &self.source {
            TemplateSource::Table => None,
            TemplateSource::Nested(inner) => Some(inner),
        }
    }

    pub fn is_nested(&self) -> bool {
        self.inner().is_some()
    }

    /// Number of aggregation passes, 1 for a leaf.
    pub fn depth(&self) -> usize {
        1 + self.inner().map_or(0, MetricTemplate::depth)
    }

    /// The pass that reads physical columns.
    pub fn innermost(&self) -> &MetricTemplate {
        self.inner().map_or(self, MetricTemplate::innermost)
    }

    /// Physical columns the innermost pass reads.
    pub fn dependent_field_names(&self) -> BTreeSet<String> {
        self.innermost()
            .aggregations
            .iter()
            .filter_map(|a| a.field_name.clone())
            .collect()
    }

    /// Columns this (outermost) pass emits, aggregators first.
    pub fn output_names(&self) -> Vec<String> {
        self.aggregations
            .iter()
            .map(|a| a.name.clone())
            .chain(
                self.post_aggregations
                    .iter()
                    .filter_map(|p| p.output_name().map(str::to_string)),
            )
            .collect()
    }

    /// Merge two templates of the same shape into one pass chain, unioning
    /// outputs level by level. Same-named outputs must agree exactly; grain
    /// overrides must agree; depths must match.
    pub fn merge(&self, other: &MetricTemplate) -> Result<MetricTemplate> {
        let time_grain = match (self.time_grain, other.time_grain) {
            (Some(a), Some(b)) if a != b => {
                return Err(GranaryError::Binding(format!(
                    "cannot merge metric templates with conflicting grains '{}' and '{}'",
                    a, b
                )));
            }
            (grain, other_grain) => grain.or(other_grain),
        };
        let mut aggregations = self.aggregations.clone();
        for theirs in &other.aggregations {
            match aggregations.iter().find(|a| a.name == theirs.name) {
                Some(ours) if ours != theirs => {
                    return Err(GranaryError::Binding(format!(
                        "conflicting definitions for aggregation '{}'",
                        theirs.name
                    )));
                }
                Some(_) => {}
                None => aggregations.push(theirs.clone()),
            }
        }
        let mut post_aggregations = self.post_aggregations.clone();
        for theirs in &other.post_aggregations {
            match post_aggregations
                .iter()
                .find(|p| p.output_name() == theirs.output_name())
            {
                Some(ours) if ours != theirs => {
                    return Err(GranaryError::Binding(format!(
                        "conflicting definitions for post-aggregation '{}'",
                        theirs.output_name().unwrap_or("<unnamed>")
                    )));
                }
                Some(_) => {}
                None => post_aggregations.push(theirs.clone()),
            }
        }
        let source = match (&self.source, &other.source) {
            (TemplateSource::Table, TemplateSource::Table) => TemplateSource::Table,
            (TemplateSource::Nested(a), TemplateSource::Nested(b)) => {
                TemplateSource::Nested(Box::new(a.merge(b)?))
            }
            _ => {
                return Err(GranaryError::Binding(
                    "cannot merge metric templates of different nesting depth".to_string(),
                ));
            }
        };
        Self::build(aggregations, post_aggregations, time_grain, source)
    }
}

/// A request-facing metric. The template is absent for raw pass-through
/// metrics that no query plan can aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogicalMetric {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<MetricTemplate>,
}

impl LogicalMetric {
    pub fn new(name: impl Into<String>, template: Option<MetricTemplate>) -> Self {
        LogicalMetric {
            name: name.into(),
            long_name: None,
            description: None,
            template,
        }
    }
}

/// Fold the templates of every requested metric into the single template a
/// query is planned from.
pub fn merged_template(metrics: &[Arc<LogicalMetric>]) -> Result<MetricTemplate> {
    let mut merged: Option<MetricTemplate> = None;
    for metric in metrics {
        if let Some(template) = &metric.template {
            merged = Some(match merged {
                Some(current) => current.merge(template)?,
                None => template.clone(),
            });
        }
    }
    merged.ok_or_else(|| {
        GranaryError::Binding("requested metrics define no aggregations".to_string())
    })
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTemplate {
    #[serde(default)]
    aggregations: Vec<Aggregation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    post_aggregations: Vec<PostAggregation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_grain: Option<TimeGrain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inner: Option<Box<RawTemplate>>,
}

impl TryFrom<RawTemplate> for MetricTemplate {
    type Error = GranaryError;

    fn try_from(raw: RawTemplate) -> Result<Self> {
        let source = match raw.inner {
            None => TemplateSource::Table,
            Some(inner) => TemplateSource::Nested(Box::new(MetricTemplate::try_from(*inner)?)),
        };
        MetricTemplate::build(raw.aggregations, raw.post_aggregations, raw.time_grain, source)
    }
}

impl From<MetricTemplate> for RawTemplate {
    fn from(template: MetricTemplate) -> Self {
        let inner = match template.source {
            TemplateSource::Table => None,
            TemplateSource::Nested(inner) => Some(Box::new(RawTemplate::from(*inner))),
        };
        RawTemplate {
            aggregations: template.aggregations,
            post_aggregations: template.post_aggregations,
            time_grain: template.time_grain,
            inner,
        }
    }
}
