use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_common::metrics::OP_SPATIAL_SELECTION;
use tessera_filter_types::{
    DatasetId, FeatureId,
    descriptor::DatasetDescriptor,
    dialect::quote_identifier,
    predicate::{self, Predicate},
    spatial::{Envelope, SpatialPredicate},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    BackendError, BackendKind, Capabilities, ProgressFn, SpatialFilter, SpatialFilterRequest,
    SpatialQueryBuilder,
    geometry::GeometryEngine,
    instrumentation::instrument_operation,
    registry::{Feature, FeatureSource, SourceGeometryContext, SpatialIndexProvider},
};

/// Cancellation is checked and progress reported every this many target features.
const CHECK_INTERVAL: usize = 256;

/// Rendered for an empty selection, it matches nothing in every supported dialect.
pub const EMPTY_SELECTION_PREDICATE: &str = "0 = 1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionResult {
    pub target_id: DatasetId,
    pub source_id: DatasetId,
    pub feature_ids: Vec<FeatureId>,
    pub scanned: usize,
}

fn parse_subset(dataset_id: &str, subset: Option<&str>) -> Result<Option<Predicate>, BackendError> {
    let Some(subset) = subset.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    predicate::parse(subset)
        .map(Some)
        .map_err(|source| BackendError::InvalidSubset {
            dataset_id: dataset_id.to_string(),
            source,
        })
}

fn matches_subset(filter: &Option<Predicate>, feature: &Feature) -> bool {
    filter.as_ref().is_none_or(|p| p.evaluate(feature))
}

/// Selects features through a geometry engine, for providers without spatial SQL.
pub struct InMemorySelectionBuilder {
    features: Arc<dyn FeatureSource>,
    index: Arc<dyn SpatialIndexProvider>,
    engine: Arc<dyn GeometryEngine>,
}

impl InMemorySelectionBuilder {
    pub fn new(
        features: Arc<dyn FeatureSource>,
        index: Arc<dyn SpatialIndexProvider>,
        engine: Arc<dyn GeometryEngine>,
    ) -> Self {
        Self {
            features,
            index,
            engine,
        }
    }

    fn ensure_spatial_index(&self, dataset_id: &str) -> Result<(), BackendError> {
        if self.index.has_spatial_index(dataset_id) {
            return Ok(());
        }
        info!(dataset_id, "Target has no spatial index, creating one");
        self.index.create_spatial_index(dataset_id)?;
        if !self.index.has_spatial_index(dataset_id) {
            return Err(BackendError::SpatialIndexUnavailable(dataset_id.to_string()));
        }
        Ok(())
    }

    /// Source geometries after subset filtering and buffering.
    fn source_geometries(
        &self,
        source: &SourceGeometryContext,
        predicate: &SpatialPredicate,
        cancel: &CancellationToken,
    ) -> Result<Vec<Envelope>, BackendError> {
        let subset = parse_subset(&source.dataset_id, source.subset.as_deref())?;
        let mut geometries = Vec::new();

        for (i, feature) in self.features.open(&source.dataset_id)?.iter().enumerate() {
            if i % CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(BackendError::Cancelled);
            }
            if !matches_subset(&subset, feature) {
                continue;
            }
            let geometry = match predicate.active_buffer() {
                Some(distance) => self.engine.buffer(&feature.envelope, distance),
                None => Some(feature.envelope),
            };
            geometries.extend(geometry);
        }

        Ok(geometries)
    }

    /// Compute the ids of target features standing in any of the predicate's relations to any
    /// source geometry. Expensive, meant to run inside a background task.
    #[instrument(skip_all, fields(target = %target.dataset_id, source = %source.dataset_id))]
    pub fn execute_spatial_selection(
        &self,
        source: &SourceGeometryContext,
        predicate: &SpatialPredicate,
        target: &DatasetDescriptor,
        existing_subset: Option<&str>,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<SelectionResult, BackendError> {
        if predicate.relations.is_empty() {
            return Err(BackendError::EmptyPredicate);
        }
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        self.ensure_spatial_index(&target.dataset_id)?;

        let target_filter = parse_subset(&target.dataset_id, existing_subset)?;
        let sources = self.source_geometries(source, predicate, cancel)?;
        let features = self.features.open(&target.dataset_id)?;
        let total = features.len() as u64;

        let mut feature_ids = Vec::new();
        for (i, feature) in features.iter().enumerate() {
            if i % CHECK_INTERVAL == 0 {
                if cancel.is_cancelled() {
                    return Err(BackendError::Cancelled);
                }
                progress(i as u64, total);
            }

            if !matches_subset(&target_filter, feature) {
                continue;
            }

            let selected = sources.iter().any(|geometry| {
                predicate
                    .relations
                    .iter()
                    .any(|relation| self.engine.evaluate(*relation, &feature.envelope, geometry))
            });
            if selected {
                feature_ids.push(feature.id);
            }
        }
        progress(total, total);

        debug!(matched = feature_ids.len(), scanned = features.len(), "Spatial selection done");

        Ok(SelectionResult {
            target_id: target.dataset_id.clone(),
            source_id: source.dataset_id.clone(),
            feature_ids,
            scanned: features.len(),
        })
    }

    /// An identifier-list predicate on the target's primary key. The predicate only names target
    /// features, so `source` never appears in it.
    pub fn build_filter_from_selection(
        &self,
        target: &DatasetDescriptor,
        selection: &SelectionResult,
        source: &SourceGeometryContext,
    ) -> String {
        debug!(
            target = %target.dataset_id,
            source = %source.dataset_id,
            matched = selection.feature_ids.len(),
            "Building filter from selection"
        );
        if selection.feature_ids.is_empty() {
            return EMPTY_SELECTION_PREDICATE.to_string();
        }

        let ids = selection
            .feature_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} IN ({ids})", quote_identifier(&target.primary_key))
    }
}

impl SpatialQueryBuilder for InMemorySelectionBuilder {
    fn backend(&self) -> BackendKind {
        BackendKind::InMemory
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_spatial_sql: false,
            requires_spatial_index: true,
            materialized_views: false,
            long_running: true,
        }
    }

    fn build_spatial_filter(
        &self,
        request: &SpatialFilterRequest,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<SpatialFilter, BackendError> {
        let selection = instrument_operation(self.backend(), OP_SPATIAL_SELECTION, || {
            self.execute_spatial_selection(
                &SourceGeometryContext::from(&request.source),
                &request.predicate,
                &request.target,
                request.target.active_subset(),
                cancel,
                progress,
            )
        })?;

        Ok(SpatialFilter {
            backend: self.backend(),
            expression: self.build_filter_from_selection(
                &request.target,
                &selection,
                &SourceGeometryContext::from(&request.source),
            ),
            subquery: None,
            matched: Some(selection.feature_ids.len()),
        })
    }
}
