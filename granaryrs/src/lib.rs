pub mod config;
pub mod constraint;
pub mod dimension;
pub mod error;
pub mod granularity;
pub mod intervals;
pub mod metric;
pub mod pagination;
pub mod partial_data;
pub mod query;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod response;
pub mod result;
pub mod service;
pub mod table;

use std::path::Path;

use crate::error::Result;
use crate::registry::ResourceDictionaries;

/// Load resource dictionaries from disk and check their cross-references.
pub fn load_and_validate<P: AsRef<Path>>(resource_dir: P) -> Result<ResourceDictionaries> {
    let dictionaries = ResourceDictionaries::load_from_dir(resource_dir)?;
    dictionaries.validate()?;
    Ok(dictionaries)
}

pub use service::{DataResponse, DataService, DruidWebService};
pub use config::GranaryConfig;
pub use dimension::{Dimension, DimensionRow};
pub use error::GranaryError;
pub use metric::LogicalMetric;
pub use query::model::DruidQuery;
pub use query::{QueryBuilder, QueryOptions};
pub use request::DataRequest;
pub use resolver::{DefaultPhysicalTableResolver, PhysicalTableResolver};
pub use response::ResponseParser;
pub use result::ResultSet;
pub use table::{LogicalTable, PhysicalTable};
