use kinded::Kinded;
use serde::{Deserialize, Serialize};
use tessera_common::metrics::{DISPATCH_ATTRIBUTE, DISPATCH_EXPORT, DISPATCH_MULTI_STEP, DISPATCH_SPATIAL};
use tessera_filter_types::{
    descriptor::DatasetDescriptor, fragment::CombineOperator, spatial::SpatialPredicate,
};

/// Filter a target by an attribute expression, typically a chain's synthesized predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeFilterRequest {
    pub target: DatasetDescriptor,
    pub expression: String,
}

/// Filter one target by its spatial relation to a source dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialRequest {
    pub target: DatasetDescriptor,
    pub source: DatasetDescriptor,
    pub predicate: SpatialPredicate,
    /// How the new keys combine with the target's existing subset, replacing it when unset.
    #[serde(default)]
    pub operator: Option<CombineOperator>,
}

/// The same spatial filter applied to several targets, one step per target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiStepRequest {
    pub source: DatasetDescriptor,
    pub predicate: SpatialPredicate,
    pub targets: Vec<DatasetDescriptor>,
    #[serde(default)]
    pub operator: Option<CombineOperator>,
}

impl MultiStepRequest {
    pub(crate) fn step(&self, target: &DatasetDescriptor) -> SpatialRequest {
        SpatialRequest {
            target: target.clone(),
            source: self.source.clone(),
            predicate: self.predicate.clone(),
            operator: self.operator,
        }
    }
}

/// Write the target's features matching `expression` (all of them when unset) as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub target: DatasetDescriptor,
    #[serde(default)]
    pub expression: Option<String>,
    /// Attributes to write, all of them when unset.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

#[derive(Kinded, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum DispatchRequest {
    AttributeFilter(AttributeFilterRequest),
    SpatialFilter(SpatialRequest),
    MultiStep(MultiStepRequest),
    Export(ExportRequest),
}

impl DispatchRequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchRequestKind::AttributeFilter => DISPATCH_ATTRIBUTE,
            DispatchRequestKind::SpatialFilter => DISPATCH_SPATIAL,
            DispatchRequestKind::MultiStep => DISPATCH_MULTI_STEP,
            DispatchRequestKind::Export => DISPATCH_EXPORT,
        }
    }
}

impl DispatchRequest {
    /// Datasets the request filters or reads.
    pub fn targets(&self) -> Vec<&DatasetDescriptor> {
        match self {
            DispatchRequest::AttributeFilter(r) => vec![&r.target],
            DispatchRequest::SpatialFilter(r) => vec![&r.target],
            DispatchRequest::MultiStep(r) => r.targets.iter().collect(),
            DispatchRequest::Export(r) => vec![&r.target],
        }
    }
}
