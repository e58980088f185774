use std::sync::Arc;

use kinded::Kinded;
use tessera_tasks::{BackgroundTask, TaskContext, TaskError, TaskKind};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    dispatcher::{Served, StranglerDispatcher},
    legacy::LegacyPath,
    request::DispatchRequest,
};

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutput {
    pub served: Served,
    /// JSON lines written by an export request, empty otherwise.
    pub exported: Vec<u8>,
}

/// Runs a request through the dispatcher off the interactive thread. The request is the
/// snapshot: it carries its descriptors by value.
pub struct DispatchTask {
    snapshot_id: String,
    request: DispatchRequest,
    dispatcher: Arc<StranglerDispatcher>,
    legacy: Arc<LegacyPath>,
}

impl DispatchTask {
    pub fn new(
        request: DispatchRequest,
        dispatcher: Arc<StranglerDispatcher>,
        legacy: Arc<LegacyPath>,
    ) -> Self {
        Self {
            snapshot_id: format!("dispatch-{}", Uuid::now_v7()),
            request,
            dispatcher,
            legacy,
        }
    }

    pub fn request(&self) -> &DispatchRequest {
        &self.request
    }
}

impl BackgroundTask for DispatchTask {
    type Output = DispatchOutput;

    fn kind(&self) -> TaskKind {
        TaskKind::Dispatch
    }

    fn snapshot_id(&self) -> String {
        self.snapshot_id.clone()
    }

    #[instrument(skip_all, fields(operation = self.request.kind().as_str()))]
    fn run(&mut self, ctx: &TaskContext) -> Result<DispatchOutput, TaskError> {
        ctx.check_cancelled()?;

        let mut exported = Vec::new();
        let served = self
            .dispatcher
            .run_with_fallback(&self.legacy, &self.request, &mut exported, ctx.cancel_token())
            .map_err(|e| {
                if ctx.is_cancelled() {
                    TaskError::Cancelled
                } else {
                    TaskError::Execution(format!("{e:#}"))
                }
            })?;

        Ok(DispatchOutput { served, exported })
    }
}
