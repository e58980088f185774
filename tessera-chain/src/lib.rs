mod chain;
mod compat;
mod parens;
mod render;
mod structured;

#[cfg(test)]
mod tests;

pub use chain::{CombinationStrategy, FilterChain};
pub use compat::{CompatibilityNote, validate_compatibility};
pub use parens::strip_redundant_outer_parens;
pub use render::{FragmentRenderer, PassThroughRenderer};
pub use structured::ChainDocument;
