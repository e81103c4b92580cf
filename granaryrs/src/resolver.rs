//! Choosing a physical table for a constrained request.

use std::cmp::Reverse;
use std::sync::Arc;

use crate::constraint::QueryPlanningConstraint;
use crate::error::{GranaryError, Result};
use crate::table::{LogicalTable, PhysicalTable};

/// Picks the physical table that will back the innermost query.
///
/// Implementations see the whole candidate group and the constraint; they
/// must either commit to one table or explain why none fits.
pub trait PhysicalTableResolver: Send + Sync {
    fn resolve(
        &self,
        table: &LogicalTable,
        constraint: &QueryPlanningConstraint,
    ) -> Result<Arc<PhysicalTable>>;
}

/// The stock resolver.
///
/// A candidate is feasible when its schema holds every constrained column and
/// its storage grain can roll up to the minimum grain. Among feasible tables
/// the coarsest grain wins, then the narrowest schema, then the lexically
/// first name, so resolution is deterministic for a fixed group.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPhysicalTableResolver;

impl PhysicalTableResolver for DefaultPhysicalTableResolver {
    fn resolve(
        &self,
        table: &LogicalTable,
        constraint: &QueryPlanningConstraint,
    ) -> Result<Arc<PhysicalTable>> {
        let candidates = table.group().tables();
        if candidates.is_empty() {
            return Err(GranaryError::NoMatchFound(format!(
                "logical table '{}' has no physical tables",
                table.name()
            )));
        }

        let feasible: Vec<&Arc<PhysicalTable>> = candidates
            .iter()
            .filter(|candidate| {
                candidate.has_columns(constraint)
                    && constraint.grain_satisfied_by(&candidate.grain())
            })
            .collect();

        if feasible.is_empty() {
            return Err(GranaryError::NoMatchFound(no_match_report(
                table, constraint,
            )));
        }

        let best = feasible
            .into_iter()
            .min_by_key(|candidate| {
                (
                    Reverse(candidate.grain().grain()),
                    candidate.columns().len(),
                    candidate.name().to_string(),
                )
            })
            .ok_or_else(|| {
                GranaryError::NoMatchFound(format!(
                    "logical table '{}' has no physical tables",
                    table.name()
                ))
            })?;

        tracing::debug!(
            logical = %table.name(),
            physical = %best.name(),
            grain = %best.grain().grain().name(),
            "resolved physical table"
        );
        Ok(Arc::clone(best))
    }
}

/// One line per rejected candidate, naming what it lacked.
fn no_match_report(table: &LogicalTable, constraint: &QueryPlanningConstraint) -> String {
    let mut reasons = Vec::new();
    for candidate in table.group().tables() {
        let missing = candidate.missing_columns(constraint);
        if !missing.is_empty() {
            reasons.push(format!(
                "'{}' is missing columns [{}]",
                candidate.name(),
                missing.join(", ")
            ));
            continue;
        }
        if !constraint.grain_satisfied_by(&candidate.grain()) {
            reasons.push(format!(
                "'{}' at grain '{}' cannot serve minimum grain '{}'",
                candidate.name(),
                candidate.grain().grain().name(),
                constraint.minimum_grain()
            ));
        }
    }
    format!(
        "no physical table for logical table '{}' satisfies the request: {}",
        table.name(),
        reasons.join("; ")
    )
}
