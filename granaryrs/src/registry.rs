use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono_tz::Tz;
use glob::glob;
use serde::Deserialize;

use crate::dimension::Dimension;
use crate::error::{GranaryError, Result};
use crate::granularity::TimeGrain;
use crate::intervals::{Interval, IntervalSet};
use crate::metric::LogicalMetric;
use crate::table::{LogicalTable, PhysicalTable, TableGroup};

/// All named resources a request can bind against.
#[derive(Debug, Default, Clone)]
pub struct ResourceDictionaries {
    dimensions: HashMap<String, Arc<Dimension>>,
    metrics: HashMap<String, Arc<LogicalMetric>>,
    tables: HashMap<String, Arc<LogicalTable>>,
}

impl ResourceDictionaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        dimensions: Vec<Arc<Dimension>>,
        metrics: Vec<Arc<LogicalMetric>>,
        tables: Vec<Arc<LogicalTable>>,
    ) -> Result<Self> {
        let mut dictionaries = ResourceDictionaries::new();
        for dimension in dimensions {
            dictionaries.insert_dimension(dimension)?;
        }
        for metric in metrics {
            dictionaries.insert_metric(metric)?;
        }
        for table in tables {
            dictionaries.insert_table(table)?;
        }
        Ok(dictionaries)
    }

    /// Load `dimensions/`, `metrics/`, and `tables/` from a resource root.
    /// Tables resolve their dimension references, so the order matters.
    pub fn load_from_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let mut dictionaries = ResourceDictionaries::new();
        dictionaries.load_dimensions(root.as_ref().join("dimensions"))?;
        dictionaries.load_metrics(root.as_ref().join("metrics"))?;
        dictionaries.load_tables(root.as_ref().join("tables"))?;
        tracing::info!(
            dimensions = dictionaries.dimensions.len(),
            metrics = dictionaries.metrics.len(),
            tables = dictionaries.tables.len(),
            "loaded resource dictionaries"
        );
        Ok(dictionaries)
    }

    fn load_dimensions(&mut self, dir: PathBuf) -> Result<()> {
        if !dir.exists() {
            return Err(GranaryError::Binding(format!(
                "dimensions directory not found: {}",
                dir.display()
            )));
        }
        for entry in glob(&format!("{}/*.yml", dir.display()))
            .map_err(|e| GranaryError::Other(e.into()))?
            .flatten()
        {
            self.load_dimension_file(&entry)?;
        }
        for entry in glob(&format!("{}/*.yaml", dir.display()))
            .map_err(|e| GranaryError::Other(e.into()))?
            .flatten()
        {
            self.load_dimension_file(&entry)?;
        }
        Ok(())
    }

    fn load_dimension_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        let dimension: Dimension = serde_yaml::from_str(&contents)?;
        self.insert_dimension(Arc::new(dimension))
    }

    fn load_metrics(&mut self, dir: PathBuf) -> Result<()> {
        if !dir.exists() {
            return Err(GranaryError::Binding(format!(
                "metrics directory not found: {}",
                dir.display()
            )));
        }
        for entry in glob(&format!("{}/*.yml", dir.display()))
            .map_err(|e| GranaryError::Other(e.into()))?
            .flatten()
        {
            self.load_metric_file(&entry)?;
        }
        for entry in glob(&format!("{}/*.yaml", dir.display()))
            .map_err(|e| GranaryError::Other(e.into()))?
            .flatten()
        {
            self.load_metric_file(&entry)?;
        }
        Ok(())
    }

    fn load_metric_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        let metric: LogicalMetric = serde_yaml::from_str(&contents)?;
        self.insert_metric(Arc::new(metric))
    }

    fn load_tables(&mut self, dir: PathBuf) -> Result<()> {
        if !dir.exists() {
            return Err(GranaryError::Binding(format!(
                "tables directory not found: {}",
                dir.display()
            )));
        }
        for entry in glob(&format!("{}/*.yml", dir.display()))
            .map_err(|e| GranaryError::Other(e.into()))?
            .flatten()
        {
            self.load_table_file(&entry)?;
        }
        for entry in glob(&format!("{}/*.yaml", dir.display()))
            .map_err(|e| GranaryError::Other(e.into()))?
            .flatten()
        {
            self.load_table_file(&entry)?;
        }
        Ok(())
    }

    fn load_table_file(&mut self, path: &Path) -> Result<()> {
        let contents = fs::read_to_string(path)?;
        let raw: RawLogicalTable = serde_yaml::from_str(&contents)?;
        let table = self.build_logical_table(raw)?;
        self.insert_table(Arc::new(table))
    }

    fn insert_dimension(&mut self, dimension: Arc<Dimension>) -> Result<()> {
        let name = dimension.api_name().to_string();
        if self.dimensions.insert(name.clone(), dimension).is_some() {
            return Err(GranaryError::Binding(format!(
                "dimension '{}' is defined twice",
                name
            )));
        }
        Ok(())
    }

    fn insert_metric(&mut self, metric: Arc<LogicalMetric>) -> Result<()> {
        let name = metric.name.clone();
        if self.metrics.insert(name.clone(), metric).is_some() {
            return Err(GranaryError::Binding(format!(
                "metric '{}' is defined twice",
                name
            )));
        }
        Ok(())
    }

    fn insert_table(&mut self, table: Arc<LogicalTable>) -> Result<()> {
        let name = table.name().to_string();
        if self.tables.insert(name.clone(), table).is_some() {
            return Err(GranaryError::Binding(format!(
                "logical table '{}' is defined twice",
                name
            )));
        }
        Ok(())
    }

    fn build_logical_table(&self, raw: RawLogicalTable) -> Result<LogicalTable> {
        let mut dimensions = Vec::new();
        for name in &raw.dimensions {
            let dimension = self.dimensions.get(name).cloned().ok_or_else(|| {
                GranaryError::Binding(format!(
                    "logical table '{}' references unknown dimension '{}'",
                    raw.name, name
                ))
            })?;
            dimensions.push(dimension);
        }
        let mut physicals = Vec::new();
        for raw_physical in raw.physical_tables {
            physicals.push(Arc::new(build_physical_table(raw_physical)?));
        }
        let mut table = LogicalTable::new(
            raw.name,
            dimensions,
            raw.metrics,
            TableGroup::new(physicals),
        );
        if let Some(description) = raw.description {
            table = table.with_description(description);
        }
        Ok(table)
    }

    /// Cross-dictionary checks that per-file loading cannot see.
    pub fn validate(&self) -> Result<()> {
        for table in self.tables.values() {
            if table.group().is_empty() {
                return Err(GranaryError::Binding(format!(
                    "logical table '{}' has no physical tables",
                    table.name()
                )));
            }
            for metric_name in table.metric_names() {
                if !self.metrics.contains_key(metric_name) {
                    return Err(GranaryError::Binding(format!(
                        "logical table '{}' references unknown metric '{}'",
                        table.name(),
                        metric_name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn dimension(&self, name: &str) -> Option<Arc<Dimension>> {
        self.dimensions.get(name).cloned()
    }

    pub fn metric(&self, name: &str) -> Option<Arc<LogicalMetric>> {
        self.metrics.get(name).cloned()
    }

    pub fn table(&self, name: &str) -> Option<Arc<LogicalTable>> {
        self.tables.get(name).cloned()
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogicalTable {
    name: String,
    #[serde(default)]
    description: Option<String>,
    dimensions: Vec<String>,
    metrics: Vec<String>,
    physical_tables: Vec<RawPhysicalTable>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPhysicalTable {
    name: String,
    datasources: Vec<String>,
    grain: String,
    #[serde(default)]
    time_zone: Option<String>,
    columns: Vec<String>,
    #[serde(default)]
    availability: BTreeMap<String, Vec<String>>,
}

fn build_physical_table(raw: RawPhysicalTable) -> Result<PhysicalTable> {
    let grain = TimeGrain::from_str(&raw.grain)?;
    let zone = match raw.time_zone {
        None => Tz::UTC,
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| GranaryError::Binding(format!("unknown time zone '{}'", name)))?,
    };
    let mut table =
        PhysicalTable::new(raw.name, raw.datasources, grain.zoned(zone))?.with_columns(raw.columns);
    for (column, raws) in raw.availability {
        let mut intervals = Vec::new();
        for value in &raws {
            intervals.push(Interval::parse(value, zone)?);
        }
        table = table.with_availability(column, IntervalSet::new(intervals));
    }
    Ok(table)
}
