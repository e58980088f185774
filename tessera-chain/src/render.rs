use tessera_filter_types::{dialect::Dialect, fragment::FilterFragment};

/// Turns a fragment into dialect specific predicate text.
///
/// Implementations must be pure: a chain memoizes the combined output keyed only on the
/// fragment set and the dialect.
pub trait FragmentRenderer: Send + Sync {
    fn render(&self, fragment: &FilterFragment, dialect: Dialect) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughRenderer;

impl FragmentRenderer for PassThroughRenderer {
    fn render(&self, fragment: &FilterFragment, dialect: Dialect) -> String {
        fragment.to_dialect_sql(dialect)
    }
}
