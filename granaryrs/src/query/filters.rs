//! Translation of API filters and havings into Druid predicate trees.

use std::collections::BTreeSet;

use rust_decimal::Decimal;

use crate::dimension::{Dimension, DimensionRow};
use crate::error::{GranaryError, Result};
use crate::query::model::{HavingSpec, QueryFilter};
use crate::request::{ApiFilter, DataRequest, FilterOp, HavingOp};

/// Collapse the request's filter clauses into one Druid filter.
///
/// Clauses are evaluated against each dimension's row store; the surviving
/// keys become a selector or in filter, and the per-dimension filters are
/// and'ed together. A dimension whose clauses strike out every row fails
/// with [`GranaryError::DimensionRowNotFound`] so the caller can answer
/// without querying Druid at all.
pub(crate) fn build_query_filter(request: &DataRequest) -> Result<Option<QueryFilter>> {
    let mut fields = Vec::new();
    for (dimension_name, clauses) in request.filters() {
        let dimension = request.table().dimension(dimension_name).ok_or_else(|| {
            GranaryError::Binding(format!("unknown dimension '{}'", dimension_name))
        })?;
        fields.push(dimension_filter(dimension, clauses)?);
    }
    Ok(QueryFilter::and(fields))
}

fn dimension_filter(dimension: &Dimension, clauses: &[ApiFilter]) -> Result<QueryFilter> {
    let keys: BTreeSet<String> = dimension
        .rows()
        .filter(|row| clauses.iter().all(|clause| clause_matches(clause, row)))
        .map(|row| row.field_value(dimension.key_field_name()).to_string())
        .collect();
    if keys.is_empty() {
        let values: Vec<String> = clauses
            .iter()
            .flat_map(|clause| clause.values.iter().cloned())
            .collect();
        return Err(GranaryError::DimensionRowNotFound {
            dimension: dimension.api_name().to_string(),
            values,
        });
    }
    let keys: Vec<String> = keys.into_iter().collect();
    if let [single] = keys.as_slice() {
        return Ok(QueryFilter::selector(dimension.api_name(), single.clone()));
    }
    Ok(QueryFilter::in_values(dimension.api_name(), keys))
}

fn clause_matches(clause: &ApiFilter, row: &DimensionRow) -> bool {
    let value = row.field_value(&clause.field);
    match clause.op {
        FilterOp::In | FilterOp::Eq => clause.values.iter().any(|v| v.as_str() == value),
        FilterOp::NotIn => !clause.values.iter().any(|v| v.as_str() == value),
        FilterOp::StartsWith => clause
            .values
            .iter()
            .any(|prefix| value.starts_with(prefix.as_str())),
        FilterOp::Contains => clause
            .values
            .iter()
            .any(|needle| value.contains(needle.as_str())),
    }
}

/// Collapse the request's having clauses into one Druid having spec.
///
/// Values within a clause are or'ed, clauses are and'ed. Druid has no
/// native gteq or lteq having, so those arrive as negations.
pub(crate) fn build_having_spec(request: &DataRequest) -> Option<HavingSpec> {
    let mut specs = Vec::new();
    for (metric_name, clauses) in request.havings() {
        for clause in clauses {
            let leaves: Vec<HavingSpec> = clause
                .values
                .iter()
                .map(|value| leaf_having(metric_name, clause.op, *value))
                .collect();
            if let Some(spec) = HavingSpec::or(leaves) {
                specs.push(spec);
            }
        }
    }
    HavingSpec::and(specs)
}

fn leaf_having(metric: &str, op: HavingOp, value: Decimal) -> HavingSpec {
    match op {
        HavingOp::Eq => HavingSpec::equal_to(metric, value),
        HavingOp::Gt => HavingSpec::greater_than(metric, value),
        HavingOp::Lt => HavingSpec::less_than(metric, value),
        HavingOp::GtEq => HavingSpec::not(HavingSpec::less_than(metric, value)),
        HavingOp::LtEq => HavingSpec::not(HavingSpec::greater_than(metric, value)),
    }
}
