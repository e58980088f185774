use std::{io::Write, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_backends::{
    BackendError, BackendKind, ProgressFn, SetOperator, SpatialFilterRequest, SpatialQueryBuilder,
    in_memory::InMemorySelectionBuilder,
    registry::{Feature, FeatureSource},
    relational::RelationalQueryBuilder,
};
use tessera_filter_types::{
    DatasetId,
    descriptor::{DatasetDescriptor, ProviderKind},
    predicate::{self, Predicate, PredicateParseError},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::BackendAvailability,
    request::{AttributeFilterRequest, ExportRequest, SpatialRequest},
    sink::FilterApplication,
};

/// Cancellation is checked every this many features in attribute filtering.
const CHECK_INTERVAL: usize = 256;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The pipeline cannot serve this request shape. Never shown to users, the legacy path runs.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid expression: {0}")]
    InvalidExpression(#[from] PredicateParseError),

    #[error("export write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("export serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            PipelineError::Cancelled | PipelineError::Backend(BackendError::Cancelled)
        )
    }
}

/// One target of a multi-step request.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStep {
    /// Human readable, like `"step 2/3: roads"`.
    pub label: String,
    /// The spatial predicate, rendered for logs.
    pub description: String,
    pub request: SpatialRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepProgress {
    /// Zero based.
    pub step: usize,
    pub steps: usize,
    pub current: u64,
    pub total: u64,
}

pub type StepProgressFn<'a> = &'a (dyn Fn(StepProgress) + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStrategy {
    /// Written feature by feature.
    Streaming,
    /// Collected first, then written.
    Buffered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub target_id: DatasetId,
    pub written: usize,
    pub strategy: ExportStrategy,
}

/// The newer execution engine consulted first by the dispatcher.
pub trait ModernPipeline: Send + Sync {
    fn supports_multi_step(&self) -> bool;

    fn supports_export(&self) -> bool;

    fn attribute_filter(
        &self,
        request: &AttributeFilterRequest,
        cancel: &CancellationToken,
    ) -> Result<FilterApplication, PipelineError>;

    fn spatial_filter(
        &self,
        request: &SpatialRequest,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<FilterApplication, PipelineError>;

    fn multi_step(
        &self,
        steps: &[PipelineStep],
        cancel: &CancellationToken,
        progress: StepProgressFn<'_>,
    ) -> Result<Vec<FilterApplication>, PipelineError> {
        let mut applications = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            debug!(step = step.label, description = step.description, "Running step");

            let forward = |current: u64, total: u64| {
                progress(StepProgress {
                    step: i,
                    steps: steps.len(),
                    current,
                    total,
                })
            };
            applications.push(self.spatial_filter(&step.request, cancel, &forward)?);
        }
        Ok(applications)
    }

    /// Write matching features as JSON lines. Cancellation is checked per feature.
    fn export(
        &self,
        request: &ExportRequest,
        out: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary, PipelineError>;
}

pub(crate) fn spatial_filter_request(request: &SpatialRequest) -> SpatialFilterRequest {
    SpatialFilterRequest {
        target: request.target.clone(),
        source: request.source.clone(),
        predicate: request.predicate.clone(),
        source_expression: None,
        operator: request.operator.map(SetOperator::from),
    }
}

/// Filters applied to an export: the target's own subset and the requested expression.
pub(crate) fn export_filters(request: &ExportRequest) -> Result<Vec<Predicate>, PredicateParseError> {
    [request.target.active_subset(), request.expression.as_deref()]
        .into_iter()
        .flatten()
        .filter(|e| !e.trim().is_empty())
        .map(predicate::parse)
        .collect()
}

/// One exported line: the primary key followed by the requested attributes.
pub(crate) fn export_row(
    feature: &Feature,
    target: &DatasetDescriptor,
    fields: Option<&[String]>,
) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert(target.primary_key.clone(), Value::from(feature.id));
    match fields {
        Some(fields) => {
            for field in fields {
                let value = feature.attributes.get(field).cloned().unwrap_or(Value::Null);
                row.insert(field.clone(), value);
            }
        }
        None => row.extend(feature.attributes.clone()),
    }
    row
}

/// Serves requests with the query builders of this workspace.
pub struct BuilderPipeline {
    relational: Arc<RelationalQueryBuilder>,
    in_memory: Arc<InMemorySelectionBuilder>,
    features: Arc<dyn FeatureSource>,
    backends: BackendAvailability,
}

impl BuilderPipeline {
    pub fn new(
        relational: Arc<RelationalQueryBuilder>,
        in_memory: Arc<InMemorySelectionBuilder>,
        features: Arc<dyn FeatureSource>,
        backends: BackendAvailability,
    ) -> Self {
        Self {
            relational,
            in_memory,
            features,
            backends,
        }
    }

    fn select_in_memory(
        &self,
        request: &SpatialFilterRequest,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<FilterApplication, PipelineError> {
        if !self.backends.memory {
            return Err(PipelineError::Unsupported(format!(
                "no backend available for '{}' ({})",
                request.target.dataset_id, request.target.provider
            )));
        }

        let filter = self.in_memory.build_spatial_filter(request, cancel, progress)?;
        Ok(FilterApplication {
            target_id: request.target.dataset_id.clone(),
            expression: filter.expression,
            feature_ids: None,
            backend_used: filter.backend,
        })
    }

    fn evaluate_in_memory(
        &self,
        target: &DatasetDescriptor,
        predicate: &Predicate,
        cancel: &CancellationToken,
    ) -> Result<Vec<i64>, PipelineError> {
        let mut ids = Vec::new();
        for (i, feature) in self.features.open(&target.dataset_id)?.iter().enumerate() {
            if i % CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if predicate.evaluate(feature) {
                ids.push(feature.id);
            }
        }
        Ok(ids)
    }
}

impl ModernPipeline for BuilderPipeline {
    fn supports_multi_step(&self) -> bool {
        true
    }

    fn supports_export(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(target = %request.target.dataset_id))]
    fn attribute_filter(
        &self,
        request: &AttributeFilterRequest,
        cancel: &CancellationToken,
    ) -> Result<FilterApplication, PipelineError> {
        let target = &request.target;
        let expression = request.expression.trim();
        if expression.is_empty() {
            return Err(PipelineError::Unsupported("empty expression".to_string()));
        }

        if self.backends.relational(target.provider) {
            return Ok(FilterApplication {
                target_id: target.dataset_id.clone(),
                expression: expression.to_string(),
                feature_ids: None,
                backend_used: BackendKind::Relational,
            });
        }

        if !self.backends.memory {
            return Err(PipelineError::Unsupported(format!(
                "no backend available for '{}' ({})",
                target.dataset_id, target.provider
            )));
        }

        let predicate = match predicate::parse(expression) {
            Ok(predicate) => predicate,
            // Provider SQL beyond the in-memory language is fine, it is just not ours to run.
            Err(e) if target.provider != ProviderKind::Memory => {
                return Err(PipelineError::Unsupported(format!(
                    "expression not evaluable in memory: {e}"
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let ids = self.evaluate_in_memory(target, &predicate, cancel)?;
        debug!(matched = ids.len(), "Evaluated attribute filter in memory");
        Ok(FilterApplication {
            target_id: target.dataset_id.clone(),
            expression: expression.to_string(),
            feature_ids: Some(ids),
            backend_used: BackendKind::InMemory,
        })
    }

    #[instrument(skip_all, fields(target = %request.target.dataset_id, source = %request.source.dataset_id))]
    fn spatial_filter(
        &self,
        request: &SpatialRequest,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<FilterApplication, PipelineError> {
        let builder_request = spatial_filter_request(request);
        if !self.backends.relational(request.target.provider) {
            return self.select_in_memory(&builder_request, cancel, progress);
        }

        match self
            .relational
            .build_spatial_filter(&builder_request, cancel, progress)
        {
            Ok(filter) => Ok(FilterApplication {
                target_id: request.target.dataset_id.clone(),
                expression: filter.expression,
                feature_ids: None,
                backend_used: filter.backend,
            }),
            Err(BackendError::InvalidDescriptor { reason, .. }) if self.backends.memory => {
                warn!(reason, "Relational builder cannot serve target, selecting in memory");
                self.select_in_memory(&builder_request, cancel, progress)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip_all, fields(target = %request.target.dataset_id))]
    fn export(
        &self,
        request: &ExportRequest,
        out: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary, PipelineError> {
        let filters = export_filters(request)?;
        let features = self.features.open(&request.target.dataset_id)?;

        let mut written = 0;
        for feature in &features {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if !filters.iter().all(|f| f.evaluate(feature)) {
                continue;
            }

            let row = export_row(feature, &request.target, request.fields.as_deref());
            serde_json::to_writer(&mut *out, &row)?;
            out.write_all(b"\n")?;
            written += 1;
        }
        out.flush()?;

        info!(written, "Exported features");
        Ok(ExportSummary {
            target_id: request.target.dataset_id.clone(),
            written,
            strategy: ExportStrategy::Streaming,
        })
    }
}
