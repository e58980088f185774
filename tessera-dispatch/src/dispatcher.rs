use std::{fmt, io::Write, sync::Arc};

use color_eyre::eyre::{Context, Result};
use kinded::Kinded;
use serde::Serialize;
use tessera_common::metrics::{
    METRICS, OUTCOME_FALLBACK, OUTCOME_HANDLED_FAILURE, OUTCOME_HANDLED_SUCCESS,
};
use tessera_filter_types::{DatasetId, descriptor::ProviderKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    config::ModernPipelineConfig,
    engine::{ExportSummary, ModernPipeline, PipelineError, PipelineStep, StepProgress},
    legacy::LegacyPath,
    request::{DispatchRequest, DispatchRequestKind, MultiStepRequest},
    sink::{FilterApplication, ResultSink},
    status::{DispatchJournal, DispatchStatus},
};

/// Why the modern pipeline declined a request.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityGap {
    PipelineDisabled,
    OperationDisabled(DispatchRequestKind),
    /// Modern spatial SQL generation for this provider is known to be incomplete.
    IncompleteBackend {
        dataset_id: DatasetId,
        provider: ProviderKind,
    },
    /// Multi-hop buffered relations are not modeled.
    BufferedMultiStep { distance: f64 },
    EngineUnsupported(DispatchRequestKind),
    /// Declined by the pipeline while running.
    Declined(String),
}

impl fmt::Display for CapabilityGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityGap::PipelineDisabled => write!(f, "modern pipeline disabled"),
            CapabilityGap::OperationDisabled(kind) => {
                write!(f, "{} disabled in modern pipeline", kind.as_str())
            }
            CapabilityGap::IncompleteBackend {
                dataset_id,
                provider,
            } => write!(f, "'{dataset_id}' uses {provider}, which is not fully supported"),
            CapabilityGap::BufferedMultiStep { distance } => {
                write!(f, "multi-step with buffer {distance} is not supported")
            }
            CapabilityGap::EngineUnsupported(kind) => {
                write!(f, "engine does not support {}", kind.as_str())
            }
            CapabilityGap::Declined(reason) => write!(f, "declined: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub operation: DispatchRequestKind,
    /// One per target, already handed to the result sink.
    pub applications: Vec<FilterApplication>,
    pub export: Option<ExportSummary>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The caller does nothing further.
    HandledSuccess(DispatchReport),
    /// A real error, to be surfaced. Cancellation also ends here, see
    /// [`PipelineError::is_cancelled`].
    HandledFailure(PipelineError),
    /// The caller must run the legacy path unchanged.
    FallbackRequested(CapabilityGap),
}

impl DispatchOutcome {
    fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::HandledSuccess(_) => OUTCOME_HANDLED_SUCCESS,
            DispatchOutcome::HandledFailure(_) => OUTCOME_HANDLED_FAILURE,
            DispatchOutcome::FallbackRequested(_) => OUTCOME_FALLBACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedBy {
    Modern,
    Legacy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Served {
    pub served_by: ServedBy,
    pub applications: Vec<FilterApplication>,
    pub export: Option<ExportSummary>,
}

pub type StepProgressSink = Arc<dyn Fn(StepProgress) + Send + Sync>;

/// Tries the modern pipeline first, and tells the caller when to fall back to the legacy path.
pub struct StranglerDispatcher {
    pipeline: Arc<dyn ModernPipeline>,
    config: ModernPipelineConfig,
    sink: Arc<dyn ResultSink>,
    step_progress: Option<StepProgressSink>,
    journal: Option<DispatchJournal>,
}

impl StranglerDispatcher {
    pub fn new(
        pipeline: Arc<dyn ModernPipeline>,
        config: ModernPipelineConfig,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            pipeline,
            config,
            sink,
            step_progress: None,
            journal: None,
        }
    }

    /// Receive per-step progress of multi-step requests.
    pub fn with_step_progress(mut self, f: impl Fn(StepProgress) + Send + Sync + 'static) -> Self {
        self.step_progress = Some(Arc::new(f));
        self
    }

    pub fn with_journal(mut self, journal: DispatchJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    fn gap(&self, request: &DispatchRequest) -> Option<CapabilityGap> {
        let kind = request.kind();
        if !self.config.enabled {
            return Some(CapabilityGap::PipelineDisabled);
        }

        match request {
            DispatchRequest::MultiStep(r) => self.multi_step_gap(r),
            DispatchRequest::Export(_) if !self.config.export => {
                Some(CapabilityGap::OperationDisabled(kind))
            }
            DispatchRequest::Export(_) if !self.pipeline.supports_export() => {
                Some(CapabilityGap::EngineUnsupported(kind))
            }
            _ => None,
        }
    }

    fn multi_step_gap(&self, request: &MultiStepRequest) -> Option<CapabilityGap> {
        let kind = DispatchRequestKind::MultiStep;
        if !self.config.multi_step {
            return Some(CapabilityGap::OperationDisabled(kind));
        }

        if let Some(target) = request
            .targets
            .iter()
            .find(|t| self.config.incomplete_spatial_backends.contains(&t.provider))
        {
            return Some(CapabilityGap::IncompleteBackend {
                dataset_id: target.dataset_id.clone(),
                provider: target.provider,
            });
        }

        if let Some(distance) = request.predicate.active_buffer() {
            return Some(CapabilityGap::BufferedMultiStep { distance });
        }

        if !self.pipeline.supports_multi_step() {
            return Some(CapabilityGap::EngineUnsupported(kind));
        }
        None
    }

    fn steps(request: &MultiStepRequest) -> Vec<PipelineStep> {
        let description = request
            .predicate
            .relations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" OR ");
        let total = request.targets.len();

        request
            .targets
            .iter()
            .enumerate()
            .map(|(i, target)| PipelineStep {
                label: format!("step {}/{total}: {}", i + 1, target.dataset_id),
                description: format!("{description} against {}", request.source.dataset_id),
                request: request.step(target),
            })
            .collect()
    }

    fn run_modern(
        &self,
        request: &DispatchRequest,
        out: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, PipelineError> {
        let operation = request.kind();
        let mut report = DispatchReport {
            operation,
            applications: Vec::new(),
            export: None,
        };

        match request {
            DispatchRequest::AttributeFilter(r) => {
                report.applications.push(self.pipeline.attribute_filter(r, cancel)?);
            }
            DispatchRequest::SpatialFilter(r) => {
                let progress = |current: u64, total: u64| debug!(current, total, "Spatial filter progress");
                report
                    .applications
                    .push(self.pipeline.spatial_filter(r, cancel, &progress)?);
            }
            DispatchRequest::MultiStep(r) => {
                let forward = |progress: StepProgress| {
                    if let Some(f) = &self.step_progress {
                        f(progress);
                    }
                };
                report.applications = self.pipeline.multi_step(&Self::steps(r), cancel, &forward)?;
                for application in &report.applications {
                    info!(
                        target = application.target_id,
                        backend = %application.backend_used,
                        "Step served"
                    );
                }
            }
            DispatchRequest::Export(r) => {
                report.export = Some(self.pipeline.export(r, out, cancel)?);
            }
        }
        Ok(report)
    }

    /// Consult the modern pipeline. On success the results were already handed to the sink.
    #[instrument(skip_all, fields(operation = request.kind().as_str()))]
    pub fn dispatch(
        &self,
        request: &DispatchRequest,
        out: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let outcome = match self.gap(request) {
            Some(gap) => DispatchOutcome::FallbackRequested(gap),
            None => match self.run_modern(request, out, cancel) {
                Ok(report) => DispatchOutcome::HandledSuccess(report),
                Err(PipelineError::Unsupported(reason)) => {
                    DispatchOutcome::FallbackRequested(CapabilityGap::Declined(reason))
                }
                Err(e) => DispatchOutcome::HandledFailure(e),
            },
        };

        METRICS
            .dispatch_outcomes_total
            .with_label_values(&[request.kind().as_str(), outcome.label()])
            .inc();

        match &outcome {
            DispatchOutcome::HandledSuccess(report) => {
                for application in &report.applications {
                    self.sink.apply(application);
                }
                debug!("Handled by modern pipeline");
            }
            DispatchOutcome::HandledFailure(e) if e.is_cancelled() => {
                info!("Modern pipeline cancelled");
            }
            DispatchOutcome::HandledFailure(e) => warn!("Modern pipeline failed: {e}"),
            DispatchOutcome::FallbackRequested(gap) => info!("Falling back to legacy path: {gap}"),
        }
        outcome
    }

    /// Dispatch, running `legacy` when the modern pipeline declines.
    pub fn run_with_fallback(
        &self,
        legacy: &LegacyPath,
        request: &DispatchRequest,
        out: &mut dyn Write,
        cancel: &CancellationToken,
    ) -> Result<Served> {
        let operation = request.kind().as_str();
        let status = self.journal.as_ref().map(|journal| {
            let targets = request
                .targets()
                .into_iter()
                .map(|t| t.dataset_id.clone())
                .collect();
            journal.start(operation, targets)
        });

        let result = match self.dispatch(request, out, cancel) {
            DispatchOutcome::HandledSuccess(report) => Ok(Served {
                served_by: ServedBy::Modern,
                applications: report.applications,
                export: report.export,
            }),
            DispatchOutcome::HandledFailure(e) => Err(e),
            DispatchOutcome::FallbackRequested(_) => legacy.run(request, out, cancel).map(|output| {
                for application in &output.applications {
                    self.sink.apply(application);
                }
                Served {
                    served_by: ServedBy::Legacy,
                    applications: output.applications,
                    export: output.export,
                }
            }),
        };

        if let Some(status) = status {
            status.finish(match &result {
                Ok(served) if served.served_by == ServedBy::Modern => DispatchStatus::ServedByModern,
                Ok(_) => DispatchStatus::ServedByLegacy,
                Err(e) if e.is_cancelled() => DispatchStatus::Cancelled,
                Err(e) => DispatchStatus::Failed(e.to_string()),
            });
        }

        result.with_context(|| format!("{operation} request failed"))
    }
}
