use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tessera_common::metrics::OP_SPATIAL_JOIN;
use tessera_filter_types::{
    DatasetId,
    descriptor::DatasetDescriptor,
    dialect::quote_identifier,
    spatial::SpatialPredicate,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::{
    BackendError, BackendKind, Capabilities, ProgressFn, SetOperator, SpatialFilter,
    SpatialFilterRequest, SpatialQueryBuilder, instrumentation::instrument_operation,
};

const TARGET_ALIAS: &str = "target";
const SOURCE_ALIAS: &str = "source";

/// A precomputed result set for one source dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedView {
    pub source_id: DatasetId,
    pub schema: String,
    pub relation: String,
}

impl MaterializedView {
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.relation)
        )
    }

    pub fn create_sql(&self, select: &str) -> String {
        format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS {} AS {select}",
            self.qualified_name()
        )
    }

    pub fn drop_sql(&self) -> String {
        format!("DROP MATERIALIZED VIEW IF EXISTS {} CASCADE", self.qualified_name())
    }
}

/// `mv_<source>_dump`, with everything outside `[a-z0-9_]` folded to `_`.
pub fn dump_relation_name(source_id: &str) -> String {
    let sanitized: String = source_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("mv_{sanitized}_dump")
}

/// Materialized views known to exist, keyed by source dataset id. Clones share state.
#[derive(Debug, Clone)]
pub struct MaterializedViewRegistry {
    schema: String,
    views: Arc<RwLock<HashMap<DatasetId, MaterializedView>>>,
}

impl MaterializedViewRegistry {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            views: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn register(&self, source_id: &str) -> MaterializedView {
        let view = MaterializedView {
            source_id: source_id.to_string(),
            schema: self.schema.clone(),
            relation: dump_relation_name(source_id),
        };
        self.views.write().insert(source_id.to_string(), view.clone());
        view
    }

    pub fn lookup(&self, source_id: &str) -> Option<MaterializedView> {
        self.views.read().get(source_id).cloned()
    }

    pub fn drop(&self, source_id: &str) -> Option<MaterializedView> {
        self.views.write().remove(source_id)
    }

    pub fn len(&self) -> usize {
        self.views.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.read().is_empty()
    }
}

/// Builds key sub-selects for SQL engines with spatial extensions.
///
/// Assumes the engine has (or doesn't need) a spatial index on the target, it never creates
/// one.
#[derive(Debug, Clone)]
pub struct RelationalQueryBuilder {
    views: MaterializedViewRegistry,
}

impl RelationalQueryBuilder {
    pub fn new(views: MaterializedViewRegistry) -> Self {
        Self { views }
    }

    pub fn views(&self) -> &MaterializedViewRegistry {
        &self.views
    }

    /// The source relation for `source_id`: its materialized dump if one is registered,
    /// `fallback_expression` otherwise.
    pub fn source_reference(&self, source_id: &str, fallback_expression: &str) -> String {
        match self.views.lookup(source_id) {
            Some(view) => {
                debug!(source_id, view = %view.qualified_name(), "Using materialized view");
                view.qualified_name()
            }
            None => fallback_expression.to_string(),
        }
    }

    /// Default source relation: the table, or a filtered sub-select when the source has a subset.
    pub fn default_source_expression(source: &DatasetDescriptor) -> String {
        match source.active_subset() {
            Some(subset) => format!("(SELECT * FROM {} WHERE {subset})", source.qualified_table()),
            None => source.qualified_table(),
        }
    }

    pub fn build_spatial_join(
        &self,
        target: &DatasetDescriptor,
        predicate: &SpatialPredicate,
        source_reference: &str,
        source_geometry_field: &str,
    ) -> String {
        let target_alias = quote_identifier(TARGET_ALIAS);
        let source_alias = quote_identifier(SOURCE_ALIAS);
        let condition = predicate.to_sql(
            &format!("{target_alias}.{}", quote_identifier(&target.geometry_field)),
            &format!("{source_alias}.{}", quote_identifier(source_geometry_field)),
        );

        format!(
            "(SELECT {target_alias}.{pk} FROM {table} AS {target_alias} INNER JOIN {source_reference} AS {source_alias} ON {condition})",
            pk = quote_identifier(&target.primary_key),
            table = target.qualified_table(),
        )
    }

    pub fn apply_combine_operator(
        &self,
        pk_field: &str,
        subquery_expression: &str,
        existing_subset: Option<&str>,
        operator: Option<SetOperator>,
    ) -> String {
        let pk = quote_identifier(pk_field);
        match (existing_subset, operator) {
            (Some(existing), Some(operator)) => format!(
                "{pk} IN ( {existing} {} {subquery_expression} )",
                operator.as_sql()
            ),
            _ => format!("{pk} IN {subquery_expression}"),
        }
    }

    /// Returns `(final_expression, subquery_expression)`.
    #[instrument(skip_all, fields(target = %target.dataset_id, source = %source.dataset_id))]
    pub fn build_filter_expression(
        &self,
        target: &DatasetDescriptor,
        source: &DatasetDescriptor,
        predicate: &SpatialPredicate,
        source_expression: Option<&str>,
        operator: Option<SetOperator>,
    ) -> Result<(String, String), BackendError> {
        if predicate.relations.is_empty() {
            return Err(BackendError::EmptyPredicate);
        }
        if target.primary_key.trim().is_empty() {
            return Err(BackendError::InvalidDescriptor {
                dataset_id: target.dataset_id.clone(),
                reason: "missing primary key".to_string(),
            });
        }
        if target.table.trim().is_empty() {
            return Err(BackendError::InvalidDescriptor {
                dataset_id: target.dataset_id.clone(),
                reason: "missing table".to_string(),
            });
        }

        let fallback = source_expression
            .map(str::to_string)
            .unwrap_or_else(|| Self::default_source_expression(source));
        let reference = self.source_reference(&source.dataset_id, &fallback);
        let subquery =
            self.build_spatial_join(target, predicate, &reference, &source.geometry_field);

        let existing_keys = target.active_subset().map(|subset| {
            format!(
                "SELECT {} FROM {} WHERE {subset}",
                quote_identifier(&target.primary_key),
                target.qualified_table()
            )
        });

        let expression = self.apply_combine_operator(
            &target.primary_key,
            &subquery,
            existing_keys.as_deref(),
            operator,
        );
        Ok((expression, subquery))
    }
}

impl SpatialQueryBuilder for RelationalQueryBuilder {
    fn backend(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_spatial_sql: true,
            requires_spatial_index: false,
            materialized_views: true,
            long_running: false,
        }
    }

    fn build_spatial_filter(
        &self,
        request: &SpatialFilterRequest,
        cancel: &CancellationToken,
        progress: ProgressFn<'_>,
    ) -> Result<SpatialFilter, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let (expression, subquery) = instrument_operation(self.backend(), OP_SPATIAL_JOIN, || {
            self.build_filter_expression(
                &request.target,
                &request.source,
                &request.predicate,
                request.source_expression.as_deref(),
                request.operator,
            )
        })?;
        progress(1, 1);

        Ok(SpatialFilter {
            backend: self.backend(),
            expression,
            subquery: Some(subquery),
            matched: None,
        })
    }
}
