use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tessera_backends::registry::FeatureSource;
use tessera_filter_types::{DatasetId, FeatureId, descriptor::DatasetDescriptor, predicate};
use tracing::{debug, instrument};

use super::new_snapshot_id;
use crate::{
    cancel_iter::CancelIter,
    context::TaskContext,
    error::TaskError,
    task::{BackgroundTask, TaskKind},
};

const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    pub id: String,
    pub dataset_id: DatasetId,
    pub expression: String,
    /// Attributes copied into the result rows. `None` returns ids only.
    pub fields: Option<Vec<String>>,
    pub limit: Option<usize>,
    pub batch_size: usize,
}

impl EvaluationSnapshot {
    pub fn new(dataset_id: impl Into<DatasetId>, expression: impl Into<String>) -> Self {
        Self {
            id: new_snapshot_id("evaluation"),
            dataset_id: dataset_id.into(),
            expression: expression.into(),
            fields: None,
            limit: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn for_dataset(descriptor: &DatasetDescriptor, expression: impl Into<String>) -> Self {
        Self::new(descriptor.dataset_id.clone(), expression)
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub dataset_id: DatasetId,
    pub feature_ids: Vec<FeatureId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Map<String, Value>>,
    pub scanned: usize,
    /// Set when the limit stopped the scan early.
    pub truncated: bool,
}

pub struct ExpressionEvaluationTask {
    snapshot: EvaluationSnapshot,
    features: Arc<dyn FeatureSource>,
}

impl ExpressionEvaluationTask {
    pub fn new(snapshot: EvaluationSnapshot, features: Arc<dyn FeatureSource>) -> Self {
        Self { snapshot, features }
    }
}

impl BackgroundTask for ExpressionEvaluationTask {
    type Output = EvaluationResult;

    fn kind(&self) -> TaskKind {
        TaskKind::ExpressionEvaluation
    }

    fn snapshot_id(&self) -> String {
        self.snapshot.id.clone()
    }

    #[instrument(skip_all, fields(dataset = %self.snapshot.dataset_id))]
    fn run(&mut self, ctx: &TaskContext) -> Result<EvaluationResult, TaskError> {
        let predicate = predicate::parse(&self.snapshot.expression)
            .map_err(|e| TaskError::Parse(e.to_string()))?;

        let features = self.features.open(&self.snapshot.dataset_id)?;
        let total = features.len() as u64;
        let limit = self.snapshot.limit.unwrap_or(usize::MAX);
        let mut result = EvaluationResult {
            dataset_id: self.snapshot.dataset_id.clone(),
            feature_ids: Vec::new(),
            rows: Vec::new(),
            scanned: 0,
            truncated: false,
        };

        let batches = CancelIter::new(
            features.chunks(self.snapshot.batch_size.max(1)),
            ctx.cancel_token().clone(),
        );
        'batches: for batch in batches {
            for feature in batch {
                if result.feature_ids.len() >= limit {
                    result.truncated = true;
                    break 'batches;
                }
                result.scanned += 1;
                if !predicate.evaluate(feature) {
                    continue;
                }

                result.feature_ids.push(feature.id);
                if let Some(fields) = &self.snapshot.fields {
                    let row = fields
                        .iter()
                        .map(|f| (f.clone(), feature.attributes.get(f).cloned().unwrap_or(Value::Null)))
                        .collect();
                    result.rows.push(row);
                }
            }
            ctx.set_progress(result.scanned as u64, total);
        }
        ctx.check_cancelled()?;
        ctx.finish_progress();

        debug!(
            scanned = result.scanned,
            matched = result.feature_ids.len(),
            truncated = result.truncated,
            "Evaluated expression"
        );
        Ok(result)
    }
}
