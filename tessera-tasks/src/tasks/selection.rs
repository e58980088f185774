use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_backends::{
    in_memory::{InMemorySelectionBuilder, SelectionResult},
    registry::SourceGeometryContext,
};
use tessera_filter_types::{descriptor::DatasetDescriptor, spatial::SpatialPredicate};
use tracing::instrument;

use super::new_snapshot_id;
use crate::{
    context::TaskContext,
    error::TaskError,
    task::{BackgroundTask, TaskKind},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialSelectionSnapshot {
    pub id: String,
    pub source: SourceGeometryContext,
    pub predicate: SpatialPredicate,
    /// Captured with its subset at submission time.
    pub target: DatasetDescriptor,
}

impl SpatialSelectionSnapshot {
    pub fn new(
        source: SourceGeometryContext,
        predicate: SpatialPredicate,
        target: DatasetDescriptor,
    ) -> Self {
        Self {
            id: new_snapshot_id("spatial-selection"),
            source,
            predicate,
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialSelectionOutput {
    pub selection: SelectionResult,
    /// Identifier-list predicate ready to be added to the target's chain.
    pub expression: String,
}

pub struct SpatialSelectionTask {
    snapshot: SpatialSelectionSnapshot,
    builder: Arc<InMemorySelectionBuilder>,
}

impl SpatialSelectionTask {
    pub fn new(snapshot: SpatialSelectionSnapshot, builder: Arc<InMemorySelectionBuilder>) -> Self {
        Self { snapshot, builder }
    }
}

impl BackgroundTask for SpatialSelectionTask {
    type Output = SpatialSelectionOutput;

    fn kind(&self) -> TaskKind {
        TaskKind::SpatialSelection
    }

    fn snapshot_id(&self) -> String {
        self.snapshot.id.clone()
    }

    #[instrument(skip_all, fields(target = %self.snapshot.target.dataset_id))]
    fn run(&mut self, ctx: &TaskContext) -> Result<SpatialSelectionOutput, TaskError> {
        let target = &self.snapshot.target;
        let progress = |current: u64, total: u64| ctx.set_progress(current, total);
        let selection = self.builder.execute_spatial_selection(
            &self.snapshot.source,
            &self.snapshot.predicate,
            target,
            target.active_subset(),
            ctx.cancel_token(),
            &progress,
        )?;

        let expression = self
            .builder
            .build_filter_from_selection(target, &selection, &self.snapshot.source);
        Ok(SpatialSelectionOutput {
            selection,
            expression,
        })
    }
}
