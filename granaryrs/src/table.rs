//! Logical tables, their backing physical tables, and availability.
//!
//! A logical table is what requests bind to; behind it sits a group of
//! physical candidates, each with its own grain, schema, and per-column
//! availability. The resolver picks one candidate per query; the partial-data
//! math unions availability across the whole group.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::constraint::QueryPlanningConstraint;
use crate::dimension::Dimension;
use crate::error::{GranaryError, Result};
use crate::granularity::ZonedTimeGrain;
use crate::intervals::IntervalSet;

/// A concrete backend table: schema, grain, and what data it actually holds.
///
/// `datasource_names` lists the backend datasources the table fans out to;
/// more than one name means queries address it as a union datasource.
#[derive(Debug, Clone)]
pub struct PhysicalTable {
    name: String,
    datasource_names: Vec<String>,
    grain: ZonedTimeGrain,
    columns: BTreeSet<String>,
    column_intervals: HashMap<String, IntervalSet>,
}

impl PhysicalTable {
    pub fn new(
        name: impl Into<String>,
        datasource_names: Vec<String>,
        grain: ZonedTimeGrain,
    ) -> Result<Self> {
        let name = name.into();
        if datasource_names.is_empty() {
            return Err(GranaryError::Binding(format!(
                "physical table '{}' must map to at least one datasource",
                name
            )));
        }
        Ok(PhysicalTable {
            name,
            datasource_names,
            grain,
            columns: BTreeSet::new(),
            column_intervals: HashMap::new(),
        })
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Record availability for a column, adding it to the schema if new.
    pub fn with_availability(mut self, column: impl Into<String>, intervals: IntervalSet) -> Self {
        let column = column.into();
        self.columns.insert(column.clone());
        self.column_intervals.insert(column, intervals);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datasource_names(&self) -> &[String] {
        &self.datasource_names
    }

    pub fn grain(&self) -> ZonedTimeGrain {
        self.grain
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    /// Whether the schema holds every column the constraint needs.
    pub fn has_columns(&self, constraint: &QueryPlanningConstraint) -> bool {
        constraint
            .all_column_names()
            .iter()
            .all(|column| self.columns.contains(column))
    }

    /// Constraint columns absent from the schema, for resolver diagnostics.
    pub fn missing_columns(&self, constraint: &QueryPlanningConstraint) -> Vec<String> {
        constraint
            .all_column_names()
            .iter()
            .filter(|column| !self.columns.contains(*column))
            .cloned()
            .collect()
    }

    /// Intervals this table can serve for the constraint: the intersection of
    /// availability across every required column. A required column with no
    /// recorded availability contributes nothing, so the result is empty.
    /// With no required columns this falls back to the union over the whole
    /// schema, the table's overall availability.
    pub fn available_intervals(&self, constraint: &QueryPlanningConstraint) -> IntervalSet {
        let required = constraint.all_column_names();
        if required.is_empty() {
            return self
                .column_intervals
                .values()
                .fold(IntervalSet::empty(), |acc, set| acc.union(set));
        }
        let mut intersection: Option<IntervalSet> = None;
        for column in required {
            let column_set = match self.column_intervals.get(column) {
                Some(set) => set.clone(),
                None => return IntervalSet::empty(),
            };
            intersection = Some(match intersection {
                Some(acc) => acc.intersect(&column_set),
                None => column_set,
            });
        }
        intersection.unwrap_or_else(IntervalSet::empty)
    }
}

/// The physical candidates backing one logical table.
#[derive(Debug, Clone, Default)]
pub struct TableGroup {
    tables: Vec<Arc<PhysicalTable>>,
}

impl TableGroup {
    pub fn new(tables: Vec<Arc<PhysicalTable>>) -> Self {
        TableGroup { tables }
    }

    pub fn tables(&self) -> &[Arc<PhysicalTable>] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// What requests bind to: a named surface of dimensions and metrics over a
/// group of physical candidates.
#[derive(Debug, Clone)]
pub struct LogicalTable {
    name: String,
    description: Option<String>,
    dimensions: Vec<Arc<Dimension>>,
    metric_names: BTreeSet<String>,
    group: TableGroup,
}

impl LogicalTable {
    pub fn new(
        name: impl Into<String>,
        dimensions: Vec<Arc<Dimension>>,
        metric_names: impl IntoIterator<Item = impl Into<String>>,
        group: TableGroup,
    ) -> Self {
        LogicalTable {
            name: name.into(),
            description: None,
            dimensions,
            metric_names: metric_names.into_iter().map(Into::into).collect(),
            group,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn dimensions(&self) -> &[Arc<Dimension>] {
        &self.dimensions
    }

    pub fn dimension(&self, api_name: &str) -> Option<&Arc<Dimension>> {
        self.dimensions.iter().find(|d| d.api_name() == api_name)
    }

    pub fn has_dimension(&self, api_name: &str) -> bool {
        self.dimension(api_name).is_some()
    }

    pub fn metric_names(&self) -> &BTreeSet<String> {
        &self.metric_names
    }

    pub fn has_metric(&self, name: &str) -> bool {
        self.metric_names.contains(name)
    }

    pub fn group(&self) -> &TableGroup {
        &self.group
    }
}

/// A physical table bound to the constraint it was resolved for.
#[derive(Debug, Clone)]
pub struct ConstrainedTable {
    table: Arc<PhysicalTable>,
    constraint: QueryPlanningConstraint,
}

impl ConstrainedTable {
    pub fn new(table: Arc<PhysicalTable>, constraint: QueryPlanningConstraint) -> Self {
        ConstrainedTable { table, constraint }
    }

    pub fn table(&self) -> &Arc<PhysicalTable> {
        &self.table
    }

    pub fn constraint(&self) -> &QueryPlanningConstraint {
        &self.constraint
    }

    pub fn name(&self) -> &str {
        self.table.name()
    }

    pub fn datasource_names(&self) -> &[String] {
        self.table.datasource_names()
    }

    pub fn grain(&self) -> ZonedTimeGrain {
        self.table.grain()
    }

    /// Availability under the constraint this table was resolved for.
    pub fn available_intervals(&self) -> IntervalSet {
        self.table.available_intervals(&self.constraint)
    }
}
