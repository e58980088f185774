pub mod descriptor;
pub mod dialect;
pub mod fragment;
pub mod predicate;
pub mod spatial;

/// Stable identifier of a dataset in the host registry. Components store this instead of any
/// live handle and resolve it at the moment of use.
pub type DatasetId = String;

/// Identifier of a single feature inside a dataset.
pub type FeatureId = i64;
