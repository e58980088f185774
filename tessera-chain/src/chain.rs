use std::{
    fmt,
    hash::{DefaultHasher, Hash, Hasher},
    sync::Arc,
};

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_common::metrics::{CACHE_HIT, CACHE_MISS, METRICS};
use tessera_filter_types::{
    dialect::Dialect,
    fragment::{FilterFragment, FragmentKind},
};
use tracing::{debug, info, instrument, warn};

use crate::{
    compat::validate_compatibility,
    parens::strip_redundant_outer_parens,
    render::{FragmentRenderer, PassThroughRenderer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombinationStrategy {
    /// Parenthesize every fragment and join with AND.
    #[default]
    PriorityAnd,
    /// Parenthesize every fragment and join with OR.
    PriorityOr,
    /// Fold left to right using each fragment's own combine operator.
    Custom,
    /// Like `PriorityAnd`, but adding a fragment always drops existing fragments of its kind.
    Replace,
}

type CacheKey = (Dialect, u64);

/// An ordered, validated set of filter fragments for one target dataset.
///
/// `build_expression` output is a pure function of the fragments and the dialect, and is
/// memoized until the next structural mutation.
pub struct FilterChain {
    target_label: String,
    strategy: CombinationStrategy,
    fragments: Vec<FilterFragment>,
    renderer: Arc<dyn FragmentRenderer>,
    cache: Mutex<HashMap<CacheKey, String>>,
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("target_label", &self.target_label)
            .field("strategy", &self.strategy)
            .field("fragments", &self.fragments)
            .finish()
    }
}

impl FilterChain {
    pub fn new(target_label: impl Into<String>, strategy: CombinationStrategy) -> Self {
        Self::with_renderer(target_label, strategy, Arc::new(PassThroughRenderer))
    }

    pub fn with_renderer(
        target_label: impl Into<String>,
        strategy: CombinationStrategy,
        renderer: Arc<dyn FragmentRenderer>,
    ) -> Self {
        Self {
            target_label: target_label.into(),
            strategy,
            fragments: Vec::new(),
            renderer,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn target_label(&self) -> &str {
        &self.target_label
    }

    pub fn strategy(&self) -> CombinationStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: CombinationStrategy) {
        if self.strategy != strategy {
            self.strategy = strategy;
            self.invalidate();
        }
    }

    /// Fragments in insertion order.
    pub fn fragments(&self) -> &[FilterFragment] {
        &self.fragments
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn has_kind(&self, kind: FragmentKind) -> bool {
        self.fragments.iter().any(|f| f.kind() == kind)
    }

    /// Number of memoized expressions currently held.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Validate and append a fragment. Returns false, leaving the chain untouched, when the
    /// fragment is invalid.
    pub fn add(&mut self, fragment: FilterFragment, replace_existing: bool) -> bool {
        if let Err(e) = fragment.validate() {
            warn!(target_label = %self.target_label, kind = %fragment.kind(), "Rejected fragment: {e}");
            return false;
        }

        for note in validate_compatibility(&self.fragments, &fragment) {
            info!(target_label = %self.target_label, kind = %fragment.kind(), "Fragment {note}");
        }

        if replace_existing || self.strategy == CombinationStrategy::Replace {
            let kind = fragment.kind();
            self.fragments.retain(|f| f.kind() != kind);
        }

        self.fragments.push(fragment);
        self.invalidate();
        true
    }

    pub(crate) fn push_validated(&mut self, fragment: FilterFragment) {
        self.fragments.push(fragment);
        self.invalidate();
    }

    /// Remove every fragment of `kind`, returning how many were removed.
    pub fn remove(&mut self, kind: FragmentKind) -> usize {
        let before = self.fragments.len();
        self.fragments.retain(|f| f.kind() != kind);
        let removed = before - self.fragments.len();
        if removed > 0 {
            self.invalidate();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
        self.invalidate();
    }

    fn invalidate(&self) {
        self.cache.lock().clear();
    }

    fn structural_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.strategy.hash(&mut hasher);
        self.fragments.hash(&mut hasher);
        hasher.finish()
    }

    /// Fragments ordered by descending priority, ties kept in insertion order.
    pub fn ordered_fragments(&self) -> Vec<&FilterFragment> {
        let mut ordered: Vec<&FilterFragment> = self.fragments.iter().collect();
        ordered.sort_by(|a, b| b.priority().cmp(&a.priority()));
        ordered
    }

    #[instrument(skip(self), fields(target_label = %self.target_label))]
    pub fn build_expression(&self, dialect: Dialect) -> String {
        if self.fragments.is_empty() {
            return String::new();
        }

        let key = (dialect, self.structural_hash());
        if let Some(expression) = self.cache.lock().get(&key) {
            METRICS.chain_builds_total.with_label_values(&[CACHE_HIT]).inc();
            return expression.clone();
        }
        METRICS.chain_builds_total.with_label_values(&[CACHE_MISS]).inc();

        let expression = self.synthesize(dialect);
        debug!(fragments = self.fragments.len(), len = expression.len(), "Built expression");

        self.cache.lock().insert(key, expression.clone());
        expression
    }

    fn synthesize(&self, dialect: Dialect) -> String {
        let rendered: Vec<(&FilterFragment, String)> = self
            .ordered_fragments()
            .into_iter()
            .map(|fragment| (fragment, self.renderer.render(fragment, dialect)))
            .filter(|(_, sql)| !sql.trim().is_empty())
            .collect();

        match rendered.as_slice() {
            [] => return String::new(),
            [(_, sql)] => return sql.clone(),
            _ => {}
        }

        let combined = match self.strategy {
            CombinationStrategy::PriorityOr => join_parenthesized(&rendered, "OR"),
            CombinationStrategy::Custom => fold_with_operators(&rendered),
            CombinationStrategy::PriorityAnd | CombinationStrategy::Replace => {
                join_parenthesized(&rendered, "AND")
            }
        };

        strip_redundant_outer_parens(&combined).to_string()
    }
}

fn join_parenthesized(rendered: &[(&FilterFragment, String)], operator: &str) -> String {
    rendered
        .iter()
        .map(|(_, sql)| format!("({sql})"))
        .collect::<Vec<_>>()
        .join(&format!(" {operator} "))
}

fn fold_with_operators(rendered: &[(&FilterFragment, String)]) -> String {
    let mut iter = rendered.iter();
    let Some((_, first)) = iter.next() else {
        return String::new();
    };

    iter.fold(first.clone(), |acc, (fragment, sql)| {
        format!("({acc}) {} ({sql})", fragment.combine_operator().as_sql())
    })
}
