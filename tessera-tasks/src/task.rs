use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{context::TaskContext, error::TaskError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ExpressionEvaluation,
    RasterRangeMask,
    RasterClip,
    RasterStatistics,
    SpatialSelection,
    Dispatch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ExpressionEvaluation => "expression_evaluation",
            TaskKind::RasterRangeMask => "raster_range_mask",
            TaskKind::RasterClip => "raster_clip",
            TaskKind::RasterStatistics => "raster_statistics",
            TaskKind::SpatialSelection => "spatial_selection",
            TaskKind::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Created -> Running -> {Succeeded, Cancelled, Failed}`, nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Running,
    Succeeded,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Cancelled | TaskState::Failed
        )
    }
}

/// A cancellable unit of off-thread work.
///
/// Everything `run` reads must be captured when the task is constructed, as owned data. `run`
/// reopens whatever live resources it needs from that snapshot and never touches state owned by
/// the submitting thread.
pub trait BackgroundTask: Send + 'static {
    type Output: Send + 'static;

    fn kind(&self) -> TaskKind;

    /// Identifies the snapshot in logs and in cancellation notices, so callers can find partial
    /// side effects to clean up.
    fn snapshot_id(&self) -> String;

    fn run(&mut self, ctx: &TaskContext) -> Result<Self::Output, TaskError>;

    /// Remove partial outputs. Called after a cancelled or failed run.
    fn cleanup(&mut self) {}
}
