use tessera_backends::BackendError;
use thiserror::Error;

/// Why a task body stopped without a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The user supplied expression does not parse. Reported before any work is done.
    #[error("parse error: {0}")]
    Parse(String),

    /// A dataset or raster could not be reopened from the snapshot.
    #[error("resource error: {0}")]
    Resource(String),

    /// Inputs reopened fine but are unusable, like a mask that is not a polygon layer.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution error: {0}")]
    Execution(String),

    /// Cooperative cancellation observed. Never reported as a failure.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskError::Parse(_) => "parse",
            TaskError::Resource(_) => "resource",
            TaskError::InvalidInput(_) => "invalid_input",
            TaskError::Execution(_) => "execution",
            TaskError::Cancelled => "cancelled",
        }
    }
}

impl From<BackendError> for TaskError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Cancelled => TaskError::Cancelled,
            BackendError::DatasetNotFound(_) => TaskError::Resource(e.to_string()),
            BackendError::InvalidSubset { .. } => TaskError::Parse(e.to_string()),
            BackendError::InvalidDescriptor { .. } | BackendError::EmptyPredicate => {
                TaskError::InvalidInput(e.to_string())
            }
            BackendError::SpatialIndexUnavailable(_) => TaskError::Execution(e.to_string()),
        }
    }
}
