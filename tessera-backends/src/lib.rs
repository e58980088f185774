use std::fmt;

use serde::{Deserialize, Serialize};
use tessera_filter_types::{
    DatasetId,
    descriptor::DatasetDescriptor,
    fragment::CombineOperator,
    spatial::SpatialPredicate,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod geometry;
pub mod in_memory;
pub mod instrumentation;
pub mod memory;
pub mod registry;
pub mod relational;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(DatasetId),

    #[error("invalid descriptor for '{dataset_id}': {reason}")]
    InvalidDescriptor { dataset_id: DatasetId, reason: String },

    #[error("invalid subset predicate on '{dataset_id}': {source}")]
    InvalidSubset {
        dataset_id: DatasetId,
        #[source]
        source: tessera_filter_types::predicate::PredicateParseError,
    },

    #[error("spatial index unavailable on '{0}'")]
    SpatialIndexUnavailable(DatasetId),

    #[error("spatial predicate has no relations")]
    EmptyPredicate,

    #[error("operation cancelled")]
    Cancelled,
}

/// Closed set of spatial query builder implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// A SQL engine with spatial extensions, the filter is a key sub-select.
    Relational,
    /// No native spatial SQL, features are selected through a geometry engine.
    InMemory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Relational => tessera_common::metrics::BACKEND_RELATIONAL,
            BackendKind::InMemory => tessera_common::metrics::BACKEND_IN_MEMORY,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Spatial predicates are rendered as SQL and evaluated by the engine.
    pub native_spatial_sql: bool,
    /// A spatial index on the target must exist before selecting.
    pub requires_spatial_index: bool,
    pub materialized_views: bool,
    /// Selection work is unbounded and belongs in a background task.
    pub long_running: bool,
}

/// SQL set operation combining an existing key set with a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

impl SetOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SetOperator::Union => "UNION",
            SetOperator::Intersect => "INTERSECT",
            SetOperator::Except => "EXCEPT",
        }
    }
}

impl From<CombineOperator> for SetOperator {
    fn from(operator: CombineOperator) -> Self {
        match operator {
            CombineOperator::And => SetOperator::Intersect,
            CombineOperator::Or => SetOperator::Union,
        }
    }
}

/// Everything a builder needs to produce a spatial filter for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialFilterRequest {
    pub target: DatasetDescriptor,
    pub source: DatasetDescriptor,
    pub predicate: SpatialPredicate,
    /// Overrides the default source relation, for example a subquery from a previous step.
    #[serde(default)]
    pub source_expression: Option<String>,
    #[serde(default)]
    pub operator: Option<SetOperator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialFilter {
    pub backend: BackendKind,
    /// Value usable as the target's subset filter.
    pub expression: String,
    /// The raw key sub-select, relational builders only.
    pub subquery: Option<String>,
    /// Number of matched features, in-memory builders only.
    pub matched: Option<usize>,
}

/// Progress sink receiving `(current, total)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

pub trait SpatialQueryBuilder: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    fn build_spatial_filter(
        &self,
        request: &SpatialFilterRequest,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<SpatialFilter, BackendError>;
}
