use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use serde_json::json;
use tessera_filter_types::{
    dialect::Dialect,
    fragment::{CombineOperator, FilterFragment, FragmentKind, ValidationError},
};
use test_case::test_case;

use crate::{CombinationStrategy, FilterChain, FragmentRenderer};

#[derive(Default)]
struct CountingRenderer {
    calls: AtomicUsize,
}

impl CountingRenderer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FragmentRenderer for CountingRenderer {
    fn render(&self, fragment: &FilterFragment, dialect: Dialect) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        fragment.to_dialect_sql(dialect)
    }
}

/// Renders every fragment blank for the OGR dialect.
struct BlankForOgr;

impl FragmentRenderer for BlankForOgr {
    fn render(&self, fragment: &FilterFragment, dialect: Dialect) -> String {
        match dialect {
            Dialect::Ogr => "   ".to_string(),
            _ => fragment.to_dialect_sql(dialect),
        }
    }
}

/// Prefixes the dialect name, so cache collisions across dialects are visible.
struct TaggingRenderer;

impl FragmentRenderer for TaggingRenderer {
    fn render(&self, fragment: &FilterFragment, dialect: Dialect) -> String {
        format!("/*{dialect}*/ {}", fragment.predicate())
    }
}

fn fragment(kind: FragmentKind, predicate: &str) -> FilterFragment {
    FilterFragment::new(kind, predicate, "layer")
}

fn fid_list(count: i64) -> String {
    let ids = (1..=count)
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("\"fid\" IN ({ids})")
}

#[test]
fn spatial_selection_before_custom_expression() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    assert!(chain.add(fragment(FragmentKind::CustomExpression, "status = 'active'"), false));
    assert!(chain.add(fragment(FragmentKind::SpatialSelection, "pk IN (1,2,3)"), false));

    assert_eq!(
        chain.build_expression(Dialect::Postgresql),
        "(pk IN (1,2,3)) AND (status = 'active')"
    );
}

#[test]
fn higher_priority_renders_first() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    for (priority, predicate) in [(20, "p20"), (95, "p95"), (50, "p50"), (1, "p1"), (70, "p70")] {
        assert!(chain.add(
            fragment(FragmentKind::CustomExpression, predicate).with_priority(priority),
            false
        ));
    }

    let expression = chain.build_expression(Dialect::Postgresql);
    let positions: Vec<usize> = ["p95", "p70", "p50", "p20", "p1"]
        .iter()
        .map(|p| expression.find(p).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{expression}");
}

#[test]
fn equal_priorities_keep_insertion_order() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityOr);
    for predicate in ["c = 3", "a = 1", "b = 2"] {
        chain.add(fragment(FragmentKind::FieldCondition, predicate), false);
    }

    let expected = "(c = 3) OR (a = 1) OR (b = 2)";
    for dialect in [Dialect::Postgresql, Dialect::Spatialite, Dialect::Postgresql] {
        assert_eq!(chain.build_expression(dialect), expected);
    }
}

#[test]
fn second_build_is_memoized() {
    let renderer = Arc::new(CountingRenderer::default());
    let mut chain =
        FilterChain::with_renderer("parcels", CombinationStrategy::PriorityAnd, renderer.clone());
    chain.add(fragment(FragmentKind::FidList, "fid IN (1, 2)"), false);
    chain.add(fragment(FragmentKind::FieldCondition, "height > 3"), false);

    let first = chain.build_expression(Dialect::Spatialite);
    assert_eq!(renderer.calls(), 2);

    let second = chain.build_expression(Dialect::Spatialite);
    assert_eq!(first, second);
    assert_eq!(renderer.calls(), 2);
    assert_eq!(chain.cache_len(), 1);
}

#[test]
fn cache_is_keyed_on_dialect() {
    let mut chain =
        FilterChain::with_renderer("parcels", CombinationStrategy::PriorityAnd, Arc::new(TaggingRenderer));
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);

    assert_eq!(chain.build_expression(Dialect::Postgresql), "/*postgresql*/ a = 1");
    assert_eq!(chain.build_expression(Dialect::Spatialite), "/*spatialite*/ a = 1");
    assert_eq!(chain.cache_len(), 2);
}

#[test]
fn add_invalidates_cache() {
    let renderer = Arc::new(CountingRenderer::default());
    let mut chain =
        FilterChain::with_renderer("parcels", CombinationStrategy::PriorityAnd, renderer.clone());
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    assert_eq!(chain.build_expression(Dialect::Postgresql), "a = 1");
    assert_eq!(chain.cache_len(), 1);

    chain.add(fragment(FragmentKind::FieldCondition, "b = 2"), false);
    assert_eq!(chain.cache_len(), 0);
    assert_eq!(chain.build_expression(Dialect::Postgresql), "(a = 1) AND (b = 2)");
    assert_eq!(renderer.calls(), 3);
}

#[test]
fn remove_invalidates_cache_only_when_something_was_removed() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    chain.add(fragment(FragmentKind::FidList, "fid IN (1)"), false);
    chain.add(fragment(FragmentKind::FidList, "fid IN (2)"), false);
    chain.build_expression(Dialect::Postgresql);

    assert_eq!(chain.remove(FragmentKind::BboxPrefilter), 0);
    assert_eq!(chain.cache_len(), 1);

    assert_eq!(chain.remove(FragmentKind::FidList), 2);
    assert_eq!(chain.cache_len(), 0);
    assert_eq!(chain.build_expression(Dialect::Postgresql), "a = 1");
}

#[test]
fn clear_invalidates_cache() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    chain.build_expression(Dialect::Ogr);

    chain.clear();
    assert!(chain.is_empty());
    assert_eq!(chain.cache_len(), 0);
    assert_eq!(chain.build_expression(Dialect::Ogr), "");
}

#[test_case(Dialect::Postgresql)]
#[test_case(Dialect::Spatialite)]
#[test_case(Dialect::Ogr)]
#[test_case(Dialect::Expression)]
fn empty_chain_is_empty_expression(dialect: Dialect) {
    let chain = FilterChain::new("parcels", CombinationStrategy::Custom);
    assert_eq!(chain.build_expression(dialect), "");
}

#[test_case("status = 'active'")]
#[test_case("(a = 1) OR (b = 2)" ; "keeps own parens")]
fn single_fragment_is_returned_verbatim(predicate: &str) {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(fragment(FragmentKind::CustomExpression, predicate), false);
    assert_eq!(chain.build_expression(Dialect::Postgresql), predicate);
}

#[test]
fn all_blank_renders_to_empty_string() {
    let mut chain =
        FilterChain::with_renderer("parcels", CombinationStrategy::PriorityAnd, Arc::new(BlankForOgr));
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    chain.add(fragment(FragmentKind::FieldCondition, "b = 2"), false);

    assert_eq!(chain.build_expression(Dialect::Ogr), "");
    assert_eq!(chain.build_expression(Dialect::Postgresql), "(a = 1) AND (b = 2)");
}

#[test]
fn invalid_fragment_is_rejected_without_mutation() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    assert!(!chain.add(fragment(FragmentKind::CustomExpression, ""), false));
    assert_eq!(chain.len(), 0);

    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    chain.build_expression(Dialect::Postgresql);

    assert!(!chain.add(fragment(FragmentKind::FidList, "   "), true));
    assert!(!chain.add(FilterFragment::new(FragmentKind::FidList, "fid = 1", ""), false));
    assert!(!chain.add(fragment(FragmentKind::FidList, "fid = 1").with_priority(0), false));
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.cache_len(), 1);
}

#[test]
fn materialized_view_shrinks_fid_list_expression() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(fragment(FragmentKind::FidList, &fid_list(1000)), false);
    let original = chain.build_expression(Dialect::Postgresql);

    assert_eq!(chain.remove(FragmentKind::FidList), 1);
    assert!(chain.add(
        fragment(
            FragmentKind::MaterializedView,
            "\"fid\" IN (SELECT \"fid\" FROM \"tessera_temp\".\"mv_roads_dump\")"
        ),
        false
    ));
    let replaced = chain.build_expression(Dialect::Postgresql);

    assert!(replaced.len() * 10 < original.len(), "{} vs {}", replaced.len(), original.len());
}

#[test]
fn materialized_view_does_not_evict_fid_list_automatically() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(fragment(FragmentKind::FidList, "fid IN (1, 2)"), false);
    chain.add(fragment(FragmentKind::MaterializedView, "fid IN (SELECT fid FROM mv)"), false);

    assert!(chain.has_kind(FragmentKind::FidList));
    assert!(chain.has_kind(FragmentKind::MaterializedView));
    assert_eq!(
        chain.build_expression(Dialect::Postgresql),
        "(fid IN (SELECT fid FROM mv)) AND (fid IN (1, 2))"
    );
}

#[test]
fn replace_existing_drops_same_kind() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    chain.add(fragment(FragmentKind::FieldCondition, "b = 2"), false);
    chain.add(fragment(FragmentKind::UserSubset, "c = 3"), false);

    chain.add(fragment(FragmentKind::FieldCondition, "d = 4"), true);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.build_expression(Dialect::Postgresql), "(d = 4) AND (c = 3)");
}

#[test]
fn replace_strategy_always_replaces() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::Replace);
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    chain.add(fragment(FragmentKind::FieldCondition, "b = 2"), false);
    chain.add(fragment(FragmentKind::CustomExpression, "c = 3"), false);

    assert_eq!(chain.len(), 2);
    assert_eq!(chain.build_expression(Dialect::Postgresql), "(b = 2) AND (c = 3)");
}

#[test]
fn custom_folds_with_each_fragments_operator() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::Custom);
    chain.add(
        fragment(FragmentKind::SpatialSelection, "a").with_operator(CombineOperator::Or),
        false,
    );
    chain.add(
        fragment(FragmentKind::FieldCondition, "b").with_operator(CombineOperator::Or),
        false,
    );
    chain.add(fragment(FragmentKind::CustomExpression, "c"), false);

    assert_eq!(chain.build_expression(Dialect::Postgresql), "((a) OR (b)) AND (c)");
}

#[test]
fn set_strategy_invalidates_cache() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::PriorityAnd);
    chain.add(fragment(FragmentKind::FieldCondition, "a = 1"), false);
    chain.add(fragment(FragmentKind::FieldCondition, "b = 2"), false);
    chain.build_expression(Dialect::Postgresql);

    chain.set_strategy(CombinationStrategy::PriorityOr);
    assert_eq!(chain.cache_len(), 0);
    assert_eq!(chain.build_expression(Dialect::Postgresql), "(a = 1) OR (b = 2)");
}

#[test]
fn structured_round_trip_keeps_every_field() {
    let mut chain = FilterChain::new("parcels", CombinationStrategy::Custom);
    chain.add(
        fragment(FragmentKind::BufferIntersect, "ST_Intersects(a, b)")
            .with_operator(CombineOperator::Or)
            .with_metadata("buffer", 12.5)
            .temporary(),
        false,
    );
    chain.add(fragment(FragmentKind::UserSubset, "zone = 'B'").with_priority(12), false);
    chain.build_expression(Dialect::Postgresql);

    let document = chain.to_structured().unwrap();
    assert!(document.get("cache").is_none());

    let restored = FilterChain::from_structured(document).unwrap();
    assert_eq!(restored.target_label(), "parcels");
    assert_eq!(restored.strategy(), CombinationStrategy::Custom);
    assert_eq!(restored.len(), chain.len());
    assert!(
        restored
            .fragments()
            .iter()
            .zip(chain.fragments())
            .all(|(a, b)| a.same_fields(b))
    );
    assert_eq!(restored.cache_len(), 0);
    assert_eq!(
        restored.build_expression(Dialect::Postgresql),
        chain.build_expression(Dialect::Postgresql)
    );
}

#[test]
fn from_structured_rejects_invalid_operator() {
    let document = json!({
        "target_label": "parcels",
        "strategy": "custom",
        "fragments": [{
            "kind": "FIELD_CONDITION",
            "predicate": "a = 1",
            "source_label": "layer",
            "priority": 50,
            "combine_operator": "XOR",
            "created_at": "2024-05-01T10:00:00Z",
        }],
    });

    let err = FilterChain::from_structured(document).unwrap_err();
    assert!(format!("{err:?}").contains("invalid combine operator"));
}

#[test]
fn from_structured_rejects_invalid_fragment() {
    let document = json!({
        "target_label": "parcels",
        "fragments": [{
            "kind": "FID_LIST",
            "predicate": " ",
            "source_label": "layer",
            "priority": 70,
            "created_at": "2024-05-01T10:00:00Z",
        }],
    });

    let err = FilterChain::from_structured(document).unwrap_err();
    assert!(format!("{err:?}").contains("fragment predicate is empty"));
}

#[test_case(300 ; "above range")]
#[test_case(-1 ; "negative")]
fn from_structured_reports_priority_out_of_range(priority: i64) {
    let document = json!({
        "target_label": "parcels",
        "fragments": [{
            "kind": "FID_LIST",
            "predicate": "fid = 1",
            "source_label": "layer",
            "priority": priority,
            "created_at": "2024-05-01T10:00:00Z",
        }],
    });

    let err = FilterChain::from_structured(document).unwrap_err();
    assert_eq!(
        err.downcast_ref::<ValidationError>(),
        Some(&ValidationError::PriorityOutOfRange(priority))
    );
}
