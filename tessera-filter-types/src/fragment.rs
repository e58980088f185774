use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

use crate::dialect::Dialect;

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("fragment predicate is empty")]
    EmptyPredicate,

    #[error("fragment source label is empty")]
    MissingSourceLabel,

    #[error("priority {0} is outside [1, 100]")]
    PriorityOutOfRange(i64),

    #[error("invalid combine operator: {0:?}")]
    InvalidOperator(String),
}

/// The semantic origin of a fragment. Each kind carries a default priority, higher priorities
/// are rendered first in a combined expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FragmentKind {
    /// Reference to a precomputed result set kept by the backend.
    MaterializedView,
    /// Cheap envelope test placed ahead of exact spatial predicates.
    BboxPrefilter,
    SpatialSelection,
    /// Explicit list of feature identifiers.
    FidList,
    BufferIntersect,
    FieldCondition,
    CustomExpression,
    /// The subset string that was already set on the dataset before this session.
    UserSubset,
}

impl FragmentKind {
    pub const ALL: [FragmentKind; 8] = [
        FragmentKind::MaterializedView,
        FragmentKind::BboxPrefilter,
        FragmentKind::SpatialSelection,
        FragmentKind::FidList,
        FragmentKind::BufferIntersect,
        FragmentKind::FieldCondition,
        FragmentKind::CustomExpression,
        FragmentKind::UserSubset,
    ];

    pub fn default_priority(&self) -> i64 {
        match self {
            FragmentKind::MaterializedView => 100,
            FragmentKind::BboxPrefilter => 90,
            FragmentKind::SpatialSelection => 80,
            FragmentKind::FidList => 70,
            FragmentKind::BufferIntersect => 60,
            FragmentKind::FieldCondition => 50,
            FragmentKind::CustomExpression => 30,
            FragmentKind::UserSubset => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::MaterializedView => "MATERIALIZED_VIEW",
            FragmentKind::BboxPrefilter => "BBOX_PREFILTER",
            FragmentKind::SpatialSelection => "SPATIAL_SELECTION",
            FragmentKind::FidList => "FID_LIST",
            FragmentKind::BufferIntersect => "BUFFER_INTERSECT",
            FragmentKind::FieldCondition => "FIELD_CONDITION",
            FragmentKind::CustomExpression => "CUSTOM_EXPRESSION",
            FragmentKind::UserSubset => "USER_SUBSET",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CombineOperator {
    #[default]
    And,
    Or,
}

impl CombineOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CombineOperator::And => "AND",
            CombineOperator::Or => "OR",
        }
    }
}

impl fmt::Display for CombineOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for CombineOperator {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(CombineOperator::And),
            "OR" => Ok(CombineOperator::Or),
            _ => Err(ValidationError::InvalidOperator(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for CombineOperator {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One typed, prioritized predicate contributing to a combined filter.
///
/// Fragments are immutable once built. Equality and hashing only look at
/// `(kind, predicate, priority)`, two fragments agreeing on those are interchangeable for
/// caching purposes even if their labels or metadata differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterFragment {
    kind: FragmentKind,
    predicate: String,
    source_label: String,
    /// Wide so out of range values reach `validate` instead of failing deserialization.
    priority: i64,
    #[serde(default)]
    combine_operator: CombineOperator,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    is_temporary: bool,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl FilterFragment {
    pub fn new(
        kind: FragmentKind,
        predicate: impl Into<String>,
        source_label: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            predicate: predicate.into(),
            source_label: source_label.into(),
            priority: kind.default_priority(),
            combine_operator: CombineOperator::And,
            metadata: Map::new(),
            is_temporary: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_operator(mut self, operator: CombineOperator) -> Self {
        self.combine_operator = operator;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn temporary(mut self) -> Self {
        self.is_temporary = true;
        self
    }

    pub fn kind(&self) -> FragmentKind {
        self.kind
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn combine_operator(&self) -> CombineOperator {
        self.combine_operator
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.predicate.trim().is_empty() {
            return Err(ValidationError::EmptyPredicate);
        }
        if self.source_label.trim().is_empty() {
            return Err(ValidationError::MissingSourceLabel);
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(ValidationError::PriorityOutOfRange(self.priority));
        }
        Ok(())
    }

    /// Render the predicate for `dialect`. Currently a pass-through for every dialect, this must
    /// stay pure since chains memoize on its output.
    pub fn to_dialect_sql(&self, _dialect: Dialect) -> String {
        self.predicate.clone()
    }

    /// Field-for-field comparison, including the attributes ignored by `==`.
    pub fn same_fields(&self, other: &FilterFragment) -> bool {
        self.kind == other.kind
            && self.predicate == other.predicate
            && self.source_label == other.source_label
            && self.priority == other.priority
            && self.combine_operator == other.combine_operator
            && self.metadata == other.metadata
            && self.is_temporary == other.is_temporary
            && self.created_at == other.created_at
    }
}

impl PartialEq for FilterFragment {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.priority == other.priority
            && self.predicate == other.predicate
    }
}

impl Eq for FilterFragment {}

impl Hash for FilterFragment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.predicate.hash(state);
        self.priority.hash(state);
    }
}
