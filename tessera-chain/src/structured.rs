use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_filter_types::fragment::FilterFragment;

use crate::chain::{CombinationStrategy, FilterChain};

/// Persisted form of a chain. The memoization cache is never part of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDocument {
    pub target_label: String,
    #[serde(default)]
    pub strategy: CombinationStrategy,
    #[serde(default)]
    pub fragments: Vec<FilterFragment>,
}

impl From<&FilterChain> for ChainDocument {
    fn from(chain: &FilterChain) -> Self {
        Self {
            target_label: chain.target_label().to_string(),
            strategy: chain.strategy(),
            fragments: chain.fragments().to_vec(),
        }
    }
}

impl ChainDocument {
    /// Rebuild a chain, re-validating every fragment on the way in.
    pub fn into_chain(self) -> Result<FilterChain> {
        let mut chain = FilterChain::new(self.target_label, self.strategy);
        for (i, fragment) in self.fragments.into_iter().enumerate() {
            fragment
                .validate()
                .with_context(|| format!("fragment #{i} ({})", fragment.kind()))?;
            chain.push_validated(fragment);
        }
        Ok(chain)
    }
}

impl FilterChain {
    pub fn to_structured(&self) -> Result<Value> {
        serde_json::to_value(ChainDocument::from(self)).context("serialize filter chain")
    }

    pub fn from_structured(value: Value) -> Result<FilterChain> {
        let document: ChainDocument =
            serde_json::from_value(value).context("parse filter chain document")?;
        document.into_chain()
    }
}
