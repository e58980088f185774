use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use color_eyre::eyre::{Context, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tessera_common::metrics::{METRICS, OP_CREATE_SPATIAL_INDEX};
use tessera_filter_types::{
    DatasetId,
    descriptor::DatasetDescriptor,
    spatial::{Envelope, GeometryType},
};
use tracing::info;

use crate::{
    BackendError, BackendKind,
    registry::{
        DatasetHandle, DatasetRegistry, Feature, FeatureSource, LayerPropertyStore,
        SpatialIndexProvider,
    },
};

fn unknown_geometry() -> GeometryType {
    GeometryType::Unknown
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDataset {
    pub descriptor: DatasetDescriptor,
    #[serde(default = "unknown_geometry")]
    pub geometry_type: GeometryType,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub has_spatial_index: bool,
}

impl MemoryDataset {
    pub fn new(descriptor: DatasetDescriptor, geometry_type: GeometryType) -> Self {
        Self {
            descriptor,
            geometry_type,
            features: Vec::new(),
            has_spatial_index: false,
        }
    }

    pub fn with_features(mut self, features: Vec<Feature>) -> Self {
        self.features = features;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.has_spatial_index = true;
        self
    }

    pub fn extent(&self) -> Option<Envelope> {
        self.features
            .iter()
            .map(|f| f.envelope)
            .reduce(|acc, e| acc.union(&e))
    }
}

type Storage = HashMap<DatasetId, MemoryDataset>;

/// Datasets held in memory, shared between clones.
///
/// Serves as the dataset registry, the layer property store, the feature source and the spatial
/// index capability all at once. Reads hand out copies, so a worker never holds the lock for
/// longer than one lookup.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeatureStore {
    storage: Arc<RwLock<Storage>>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of datasets.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open datasets file {path:?}"))?;
        let datasets: Vec<MemoryDataset> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parse datasets file {path:?}"))?;

        let store = Self::new();
        for dataset in datasets {
            store.insert(dataset);
        }
        Ok(store)
    }

    pub fn insert(&self, dataset: MemoryDataset) {
        self.storage
            .write()
            .insert(dataset.descriptor.dataset_id.clone(), dataset);
    }

    pub fn remove(&self, dataset_id: &str) -> Option<MemoryDataset> {
        self.storage.write().remove(dataset_id)
    }

    pub fn dataset(&self, dataset_id: &str) -> Option<MemoryDataset> {
        self.storage.read().get(dataset_id).cloned()
    }

    pub fn dataset_ids(&self) -> Vec<DatasetId> {
        let mut ids: Vec<_> = self.storage.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace the subset predicate of a dataset, returning false if it doesn't exist.
    pub fn set_subset(&self, dataset_id: &str, subset: Option<String>) -> bool {
        match self.storage.write().get_mut(dataset_id) {
            Some(dataset) => {
                dataset.descriptor.existing_subset = subset;
                true
            }
            None => false,
        }
    }

    pub fn subset(&self, dataset_id: &str) -> Option<String> {
        self.storage
            .read()
            .get(dataset_id)
            .and_then(|d| d.descriptor.existing_subset.clone())
    }
}

impl DatasetRegistry for MemoryFeatureStore {
    fn resolve(&self, dataset_id: &str) -> Option<DatasetHandle> {
        self.storage.read().get(dataset_id).map(|d| DatasetHandle {
            descriptor: d.descriptor.clone(),
            geometry_type: d.geometry_type,
            feature_count: d.features.len(),
        })
    }
}

impl LayerPropertyStore for MemoryFeatureStore {
    fn properties(&self, dataset_id: &str) -> Option<DatasetDescriptor> {
        self.storage
            .read()
            .get(dataset_id)
            .map(|d| d.descriptor.clone())
    }
}

impl FeatureSource for MemoryFeatureStore {
    fn open(&self, dataset_id: &str) -> Result<Vec<Feature>, BackendError> {
        self.storage
            .read()
            .get(dataset_id)
            .map(|d| d.features.clone())
            .ok_or_else(|| BackendError::DatasetNotFound(dataset_id.to_string()))
    }
}

impl SpatialIndexProvider for MemoryFeatureStore {
    fn has_spatial_index(&self, dataset_id: &str) -> bool {
        self.storage
            .read()
            .get(dataset_id)
            .is_some_and(|d| d.has_spatial_index)
    }

    fn create_spatial_index(&self, dataset_id: &str) -> Result<(), BackendError> {
        let mut guard = self.storage.write();
        let dataset = guard
            .get_mut(dataset_id)
            .ok_or_else(|| BackendError::DatasetNotFound(dataset_id.to_string()))?;

        if !dataset.has_spatial_index {
            METRICS
                .backend_operations_total
                .with_label_values(&[BackendKind::InMemory.as_str(), OP_CREATE_SPATIAL_INDEX])
                .inc();
            info!(dataset_id, features = dataset.features.len(), "Created spatial index");
            dataset.has_spatial_index = true;
        }
        Ok(())
    }
}
