//! Dimensions: named grouping attributes with a local row store.
//!
//! A dimension exposes an ordered field list whose first entry is the key
//! field. The row store maps key values to full rows and backs both filter
//! resolution and result annotation; unknown keys coming back from the
//! backend are padded out with empty placeholder rows.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{GranaryError, Result};

/// A named attribute of a dimension, e.g. `id` or `desc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DimensionField {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl DimensionField {
    pub fn named(name: impl Into<String>) -> Self {
        DimensionField {
            name: name.into(),
            description: None,
        }
    }
}

/// One row of a dimension: field name to value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionRow(BTreeMap<String, String>);

impl DimensionRow {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        DimensionRow(values)
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        DimensionRow(
            pairs
                .into_iter()
                .map(|(field, value)| (field.to_string(), value.to_string()))
                .collect(),
        )
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Field value with missing fields reading as empty.
    pub fn field_value(&self, field: &str) -> &str {
        self.get(field).unwrap_or("")
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// A grouping dimension and its row store.
#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    api_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    fields: Vec<DimensionField>,
    default_fields: Vec<String>,
    aggregatable: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    rows: BTreeMap<String, DimensionRow>,
}

fn standard_fields() -> Vec<DimensionField> {
    vec![DimensionField::named("id"), DimensionField::named("desc")]
}

impl Dimension {
    /// A dimension with the standard `id`/`desc` fields and no rows.
    pub fn new(api_name: impl Into<String>) -> Self {
        let fields = standard_fields();
        let default_fields = fields.iter().map(|f| f.name.clone()).collect();
        Dimension {
            api_name: api_name.into(),
            description: None,
            fields,
            default_fields,
            aggregatable: true,
            rows: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the field list. The first field is the key field; the default
    /// output fields reset to the full list.
    pub fn with_fields(mut self, fields: Vec<DimensionField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(GranaryError::Binding(format!(
                "dimension '{}' must declare at least a key field",
                self.api_name
            )));
        }
        self.default_fields = fields.iter().map(|f| f.name.clone()).collect();
        self.fields = fields;
        Ok(self)
    }

    pub fn with_default_fields(mut self, names: Vec<String>) -> Result<Self> {
        for name in &names {
            if !self.has_field(name) {
                return Err(GranaryError::Binding(format!(
                    "default field '{}' is not a field of dimension '{}'",
                    name, self.api_name
                )));
            }
        }
        if !names.is_empty() {
            self.default_fields = names;
        }
        Ok(self)
    }

    /// Non-aggregatable dimensions cannot be summed over and face stricter
    /// filter rules at request binding.
    pub fn non_aggregatable(mut self) -> Self {
        self.aggregatable = false;
        self
    }

    pub fn with_rows(mut self, rows: Vec<DimensionRow>) -> Result<Self> {
        let key_field = self.key_field_name().to_string();
        for row in rows {
            let key = row.get(&key_field).map(str::to_string).ok_or_else(|| {
                GranaryError::Binding(format!(
                    "row for dimension '{}' is missing key field '{}'",
                    self.api_name, key_field
                ))
            })?;
            if self.rows.insert(key.clone(), row).is_some() {
                return Err(GranaryError::Binding(format!(
                    "dimension '{}' has duplicate rows for key '{}'",
                    self.api_name, key
                )));
            }
        }
        Ok(self)
    }

    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn fields(&self) -> &[DimensionField] {
        &self.fields
    }

    pub fn default_fields(&self) -> &[String] {
        &self.default_fields
    }

    pub fn is_aggregatable(&self) -> bool {
        self.aggregatable
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    /// Name of the key field. Construction guarantees a non-empty field list.
    pub fn key_field_name(&self) -> &str {
        self.fields
            .first()
            .map(|f| f.name.as_str())
            .unwrap_or("id")
    }

    pub fn rows(&self) -> impl Iterator<Item = &DimensionRow> {
        self.rows.values()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn find_row_by_key(&self, key: &str) -> Option<&DimensionRow> {
        self.rows.get(key)
    }

    /// Placeholder row for a key the store has never seen: the key field
    /// carries the key, every other field is empty.
    pub fn create_empty_row(&self, key: &str) -> DimensionRow {
        let key_field = self.key_field_name();
        DimensionRow(
            self.fields
                .iter()
                .map(|f| {
                    let value = if f.name == key_field { key } else { "" };
                    (f.name.clone(), value.to_string())
                })
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct RawDimension {
            api_name: String,
            #[serde(default)]
            description: Option<String>,
            #[serde(default)]
            fields: Vec<DimensionField>,
            #[serde(default)]
            default_fields: Vec<String>,
            #[serde(default = "default_aggregatable")]
            aggregatable: bool,
            #[serde(default)]
            rows: Vec<DimensionRow>,
        }

        fn default_aggregatable() -> bool {
            true
        }

        let raw = RawDimension::deserialize(deserializer)?;
        let mut dimension = Dimension::new(raw.api_name);
        if let Some(description) = raw.description {
            dimension = dimension.with_description(description);
        }
        if !raw.fields.is_empty() {
            dimension = dimension.with_fields(raw.fields).map_err(D::Error::custom)?;
        }
        dimension = dimension
            .with_default_fields(raw.default_fields)
            .map_err(D::Error::custom)?;
        if !raw.aggregatable {
            dimension = dimension.non_aggregatable();
        }
        dimension.with_rows(raw.rows).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gender() -> Dimension {
        Dimension::new("gender")
            .with_rows(vec![
                DimensionRow::from_pairs([("id", "m"), ("desc", "Male")]),
                DimensionRow::from_pairs([("id", "f"), ("desc", "Female")]),
            ])
            .expect("rows")
    }

    #[test]
    fn finds_rows_by_key() {
        let dim = gender();
        assert_eq!(
            dim.find_row_by_key("m").and_then(|r| r.get("desc")),
            Some("Male")
        );
        assert!(dim.find_row_by_key("x").is_none());
    }

    #[test]
    fn empty_rows_carry_the_key_and_blank_fields() {
        let row = gender().create_empty_row("u");
        assert_eq!(row.get("id"), Some("u"));
        assert_eq!(row.get("desc"), Some(""));
    }

    #[test]
    fn rows_must_carry_the_key_field() {
        let result =
            Dimension::new("gender").with_rows(vec![DimensionRow::from_pairs([("desc", "Male")])]);
        assert!(result.is_err());
    }

    #[test]
    fn default_fields_must_exist() {
        let result = Dimension::new("page").with_default_fields(vec!["nickname".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn deserializes_from_dictionary_yaml() {
        let yaml = r#"
api_name: gender
description: Viewer gender
aggregatable: false
rows:
  - id: m
    desc: Male
  - id: f
    desc: Female
"#;
        let dim: Dimension = serde_yaml::from_str(yaml).expect("dimension yaml");
        assert_eq!(dim.api_name(), "gender");
        assert!(!dim.is_aggregatable());
        assert_eq!(dim.row_count(), 2);
        assert_eq!(dim.key_field_name(), "id");
    }
}
