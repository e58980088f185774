use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_filter_types::{
    DatasetId, FeatureId,
    descriptor::DatasetDescriptor,
    predicate::FieldSource,
    spatial::{Envelope, GeometryType},
};

use crate::BackendError;

/// One feature as handed to a worker: an owned copy, never a live handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub envelope: Envelope,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl FieldSource for Feature {
    fn field(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }
}

/// What the registry knows about a live dataset at lookup time.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetHandle {
    pub descriptor: DatasetDescriptor,
    pub geometry_type: GeometryType,
    pub feature_count: usize,
}

/// Resolves stable dataset identifiers into live handles. A `None` means the dataset is gone.
pub trait DatasetRegistry: Send + Sync {
    fn resolve(&self, dataset_id: &str) -> Option<DatasetHandle>;
}

/// Read-only descriptive properties keyed by dataset id.
pub trait LayerPropertyStore: Send + Sync {
    fn properties(&self, dataset_id: &str) -> Option<DatasetDescriptor>;
}

/// Reopens a dataset by id, returning an independent copy of its features.
pub trait FeatureSource: Send + Sync {
    fn open(&self, dataset_id: &str) -> Result<Vec<Feature>, BackendError>;
}

pub trait SpatialIndexProvider: Send + Sync {
    fn has_spatial_index(&self, dataset_id: &str) -> bool;

    fn create_spatial_index(&self, dataset_id: &str) -> Result<(), BackendError>;
}

/// Input geometries for an in-memory selection, described as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceGeometryContext {
    pub dataset_id: DatasetId,
    #[serde(default)]
    pub subset: Option<String>,
}

impl SourceGeometryContext {
    pub fn new(dataset_id: impl Into<DatasetId>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            subset: None,
        }
    }

    pub fn with_subset(mut self, subset: impl Into<String>) -> Self {
        self.subset = Some(subset.into());
        self
    }
}

impl From<&DatasetDescriptor> for SourceGeometryContext {
    fn from(descriptor: &DatasetDescriptor) -> Self {
        Self {
            dataset_id: descriptor.dataset_id.clone(),
            subset: descriptor.active_subset().map(str::to_string),
        }
    }
}
