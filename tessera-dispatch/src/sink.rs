use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_backends::{BackendKind, memory::MemoryFeatureStore};
use tessera_filter_types::{DatasetId, FeatureId};
use tracing::{info, warn};

/// A predicate ready to be applied to one target, and how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterApplication {
    pub target_id: DatasetId,
    pub expression: String,
    /// Known only when the features were selected in process.
    #[serde(default)]
    pub feature_ids: Option<Vec<FeatureId>>,
    /// May differ from what the target's provider suggests, after an internal fallback.
    pub backend_used: BackendKind,
}

/// Applies finished filters to their targets. Nothing in this workspace applies a predicate
/// itself.
pub trait ResultSink: Send + Sync {
    fn apply(&self, application: &FilterApplication);
}

/// Keeps every application, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    applications: Arc<Mutex<Vec<FilterApplication>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applications(&self) -> Vec<FilterApplication> {
        self.applications.lock().clone()
    }

    pub fn take(&self) -> Vec<FilterApplication> {
        std::mem::take(&mut *self.applications.lock())
    }
}

impl ResultSink for RecordingSink {
    fn apply(&self, application: &FilterApplication) {
        self.applications.lock().push(application.clone());
    }
}

/// Sets the expression as the target's subset in a memory store.
#[derive(Debug, Clone)]
pub struct StoreSubsetSink {
    store: MemoryFeatureStore,
}

impl StoreSubsetSink {
    pub fn new(store: MemoryFeatureStore) -> Self {
        Self { store }
    }
}

impl ResultSink for StoreSubsetSink {
    fn apply(&self, application: &FilterApplication) {
        let target = &application.target_id;
        if self
            .store
            .set_subset(target, Some(application.expression.clone()))
        {
            info!(target, backend = %application.backend_used, "Applied filter");
        } else {
            warn!(target, "Target vanished before its filter could be applied");
        }
    }
}
