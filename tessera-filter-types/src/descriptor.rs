use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    DatasetId,
    dialect::{Dialect, quote_identifier},
};

/// Storage provider behind a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Postgresql,
    Spatialite,
    Ogr,
    Memory,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Postgresql => "postgresql",
            ProviderKind::Spatialite => "spatialite",
            ProviderKind::Ogr => "ogr",
            ProviderKind::Memory => "memory",
        }
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            ProviderKind::Postgresql => Dialect::Postgresql,
            ProviderKind::Spatialite => Dialect::Spatialite,
            ProviderKind::Ogr => Dialect::Ogr,
            ProviderKind::Memory => Dialect::Expression,
        }
    }

    /// Providers that are full SQL engines with spatial extensions.
    pub fn is_relational(&self) -> bool {
        matches!(self, ProviderKind::Postgresql | ProviderKind::Spatialite)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_primary_key() -> String {
    "fid".to_string()
}

fn default_geometry_field() -> String {
    "geom".to_string()
}

/// Descriptive properties of a dataset, as kept by the host's layer property store.
///
/// This is plain data: cloning it into a task snapshot never shares anything with the
/// interactive side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub dataset_id: DatasetId,
    pub provider: ProviderKind,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
    #[serde(default = "default_geometry_field")]
    pub geometry_field: String,
    #[serde(default)]
    pub crs: Option<String>,
    #[serde(default)]
    pub existing_subset: Option<String>,
}

impl DatasetDescriptor {
    pub fn new(
        dataset_id: impl Into<DatasetId>,
        provider: ProviderKind,
        table: impl Into<String>,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            provider,
            primary_key: default_primary_key(),
            schema: None,
            table: table.into(),
            geometry_field: default_geometry_field(),
            crs: None,
            existing_subset: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn with_geometry_field(mut self, field: impl Into<String>) -> Self {
        self.geometry_field = field.into();
        self
    }

    pub fn with_existing_subset(mut self, subset: impl Into<String>) -> Self {
        self.existing_subset = Some(subset.into());
        self
    }

    /// The subset predicate, if one is set and not blank.
    pub fn active_subset(&self) -> Option<&str> {
        self.existing_subset
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// `"schema"."table"`, or just `"table"` when no schema is known.
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(&self.table)),
            None => quote_identifier(&self.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_table_quotes_parts() {
        let descriptor =
            DatasetDescriptor::new("roads", ProviderKind::Postgresql, "roads").with_schema("gis");
        assert_eq!(descriptor.qualified_table(), r#""gis"."roads""#);

        let descriptor = DatasetDescriptor::new("roads", ProviderKind::Spatialite, "roads");
        assert_eq!(descriptor.qualified_table(), r#""roads""#);
    }

    #[test]
    fn blank_subset_is_not_active() {
        let descriptor = DatasetDescriptor::new("a", ProviderKind::Ogr, "a").with_existing_subset("  ");
        assert_eq!(descriptor.active_subset(), None);
    }

    #[test]
    fn deserialize_fills_defaults() {
        let descriptor: DatasetDescriptor = serde_json::from_str(
            r#"{"dataset_id": "parcels", "provider": "postgresql", "table": "parcels"}"#,
        )
        .unwrap();
        assert_eq!(descriptor.primary_key, "fid");
        assert_eq!(descriptor.geometry_field, "geom");
        assert_eq!(descriptor.existing_subset, None);
    }
}
