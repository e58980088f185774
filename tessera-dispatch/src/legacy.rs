use std::{io::Write, sync::Arc};

use tessera_backends::{
    BackendKind, SpatialQueryBuilder, in_memory::InMemorySelectionBuilder, registry::FeatureSource,
    relational::RelationalQueryBuilder,
};
use tessera_filter_types::descriptor::DatasetDescriptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    engine::{ExportStrategy, ExportSummary, PipelineError, export_filters, export_row, spatial_filter_request},
    request::{AttributeFilterRequest, DispatchRequest, ExportRequest, MultiStepRequest, SpatialRequest},
    sink::FilterApplication,
};

/// Outputs of a legacy run, one of the two is set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LegacyOutput {
    pub applications: Vec<FilterApplication>,
    pub export: Option<ExportSummary>,
}

/// The proven path: picks the builder from the target's provider and nothing else, with no
/// capability checks and no internal fallback.
pub struct LegacyPath {
    relational: Arc<RelationalQueryBuilder>,
    in_memory: Arc<InMemorySelectionBuilder>,
    features: Arc<dyn FeatureSource>,
}

fn no_progress(_: u64, _: u64) {}

impl LegacyPath {
    pub fn new(
        relational: Arc<RelationalQueryBuilder>,
        in_memory: Arc<InMemorySelectionBuilder>,
        features: Arc<dyn FeatureSource>,
    ) -> Self {
        Self {
            relational,
            in_memory,
            features,
        }
    }

    fn backend_for(target: &DatasetDescriptor) -> BackendKind {
        if target.provider.is_relational() {
            BackendKind::Relational
        } else {
            BackendKind::InMemory
        }
    }

    pub fn run(
        &self,
        request: &DispatchRequest,
        out: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<LegacyOutput, PipelineError> {
        let output = match request {
            DispatchRequest::AttributeFilter(r) => LegacyOutput {
                applications: vec![self.attribute_filter(r)],
                export: None,
            },
            DispatchRequest::SpatialFilter(r) => LegacyOutput {
                applications: vec![self.spatial_filter(r, cancel)?],
                export: None,
            },
            DispatchRequest::MultiStep(r) => LegacyOutput {
                applications: self.multi_step(r, cancel)?,
                export: None,
            },
            DispatchRequest::Export(r) => LegacyOutput {
                applications: Vec::new(),
                export: Some(self.export(r, out, cancel)?),
            },
        };
        Ok(output)
    }

    /// The expression is handed to the provider as is.
    pub fn attribute_filter(&self, request: &AttributeFilterRequest) -> FilterApplication {
        FilterApplication {
            target_id: request.target.dataset_id.clone(),
            expression: request.expression.trim().to_string(),
            feature_ids: None,
            backend_used: Self::backend_for(&request.target),
        }
    }

    #[instrument(skip_all, fields(target = %request.target.dataset_id))]
    pub fn spatial_filter(
        &self,
        request: &SpatialRequest,
        cancel: &CancellationToken,
    ) -> Result<FilterApplication, PipelineError> {
        let builder_request = spatial_filter_request(request);
        let filter = match Self::backend_for(&request.target) {
            BackendKind::Relational => {
                self.relational
                    .build_spatial_filter(&builder_request, cancel, &no_progress)?
            }
            BackendKind::InMemory => {
                self.in_memory
                    .build_spatial_filter(&builder_request, cancel, &no_progress)?
            }
        };
        debug!(backend = %filter.backend, "Legacy spatial filter built");

        Ok(FilterApplication {
            target_id: request.target.dataset_id.clone(),
            expression: filter.expression,
            feature_ids: None,
            backend_used: filter.backend,
        })
    }

    pub fn multi_step(
        &self,
        request: &MultiStepRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<FilterApplication>, PipelineError> {
        request
            .targets
            .iter()
            .map(|target| self.spatial_filter(&request.step(target), cancel))
            .collect()
    }

    #[instrument(skip_all, fields(target = %request.target.dataset_id))]
    pub fn export(
        &self,
        request: &ExportRequest,
        out: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<ExportSummary, PipelineError> {
        let filters = export_filters(request)?;
        let rows: Vec<_> = self
            .features
            .open(&request.target.dataset_id)?
            .iter()
            .filter(|feature| filters.iter().all(|f| f.evaluate(*feature)))
            .map(|feature| export_row(feature, &request.target, request.fields.as_deref()))
            .collect();

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        for row in &rows {
            serde_json::to_writer(&mut *out, row)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;

        info!(written = rows.len(), "Exported features");
        Ok(ExportSummary {
            target_id: request.target.dataset_id.clone(),
            written: rows.len(),
            strategy: ExportStrategy::Buffered,
        })
    }
}
