use std::sync::Arc;

use color_eyre::eyre::{ContextCompat, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tessera_backends::{
    geometry::{EnvelopeEngine, GeometryEngine},
    in_memory::InMemorySelectionBuilder,
    memory::MemoryFeatureStore,
    registry::{DatasetRegistry, FeatureSource, LayerPropertyStore, SpatialIndexProvider},
    relational::{MaterializedViewRegistry, RelationalQueryBuilder},
};
use tessera_chain::{CombinationStrategy, FilterChain};
use tessera_filter_types::{DatasetId, descriptor::DatasetDescriptor, dialect::Dialect};
use tessera_tasks::{
    TaskCallbacks, TaskHandle, TaskScheduler,
    tasks::{
        EvaluationResult, EvaluationSnapshot, ExpressionEvaluationTask, RangeMaskSnapshot,
        RasterStatsSnapshot,
    },
};

use crate::{
    config::Config,
    dispatcher::StranglerDispatcher,
    engine::BuilderPipeline,
    legacy::LegacyPath,
    request::DispatchRequest,
    sink::ResultSink,
    status::DispatchJournal,
    task::DispatchTask,
};

/// Everything one filtering session needs, built once and passed explicitly to the parts that
/// use it.
pub struct SessionContext {
    config: Config,
    scheduler: Arc<TaskScheduler>,
    registry: Arc<dyn DatasetRegistry>,
    properties: Arc<dyn LayerPropertyStore>,
    features: Arc<dyn FeatureSource>,
    relational: Arc<RelationalQueryBuilder>,
    in_memory: Arc<InMemorySelectionBuilder>,
    chains: Mutex<HashMap<DatasetId, FilterChain>>,
    journal: DispatchJournal,
}

impl SessionContext {
    pub fn new(
        config: Config,
        registry: Arc<dyn DatasetRegistry>,
        properties: Arc<dyn LayerPropertyStore>,
        features: Arc<dyn FeatureSource>,
        index: Arc<dyn SpatialIndexProvider>,
        engine: Arc<dyn GeometryEngine>,
    ) -> Result<Self> {
        let scheduler = Arc::new(TaskScheduler::new(config.workers)?);
        let views = MaterializedViewRegistry::new(config.materialized_views.schema.clone());
        let in_memory = InMemorySelectionBuilder::new(features.clone(), index, engine);

        Ok(Self {
            config,
            scheduler,
            registry,
            properties,
            features,
            relational: Arc::new(RelationalQueryBuilder::new(views)),
            in_memory: Arc::new(in_memory),
            chains: Mutex::new(HashMap::new()),
            journal: DispatchJournal::new(),
        })
    }

    /// A session over a memory store, evaluating relations on envelopes.
    pub fn with_memory_store(config: Config, store: &MemoryFeatureStore) -> Result<Self> {
        let store = Arc::new(store.clone());
        Self::new(
            config,
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            Arc::new(EnvelopeEngine),
        )
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn features(&self) -> Arc<dyn FeatureSource> {
        self.features.clone()
    }

    pub fn relational_builder(&self) -> Arc<RelationalQueryBuilder> {
        self.relational.clone()
    }

    pub fn in_memory_builder(&self) -> Arc<InMemorySelectionBuilder> {
        self.in_memory.clone()
    }

    pub fn journal(&self) -> &DispatchJournal {
        &self.journal
    }

    /// The current descriptor of a live dataset.
    pub fn descriptor(&self, dataset_id: &str) -> Result<DatasetDescriptor> {
        if self.registry.resolve(dataset_id).is_none() {
            color_eyre::eyre::bail!("dataset '{dataset_id}' is not registered");
        }
        self.properties
            .properties(dataset_id)
            .with_context(|| format!("no properties for dataset '{dataset_id}'"))
    }

    /// Run `f` on the target's chain, creating an empty one on first use.
    pub fn with_chain<R>(&self, target: &str, f: impl FnOnce(&mut FilterChain) -> R) -> R {
        let mut chains = self.chains.lock();
        let chain = chains
            .entry(target.to_string())
            .or_insert_with(|| FilterChain::new(target, CombinationStrategy::default()));
        f(chain)
    }

    /// Replace the target's chain, for example with one restored from a structured document.
    pub fn set_chain(&self, chain: FilterChain) {
        self.chains
            .lock()
            .insert(chain.target_label().to_string(), chain);
    }

    pub fn build_expression(&self, target: &str, dialect: Dialect) -> String {
        self.with_chain(target, |chain| chain.build_expression(dialect))
    }

    pub fn end_chain(&self, target: &str) -> Option<FilterChain> {
        self.chains.lock().remove(target)
    }

    pub fn pipeline(&self) -> BuilderPipeline {
        BuilderPipeline::new(
            self.relational.clone(),
            self.in_memory.clone(),
            self.features.clone(),
            self.config.backends.clone(),
        )
    }

    pub fn legacy(&self) -> LegacyPath {
        LegacyPath::new(
            self.relational.clone(),
            self.in_memory.clone(),
            self.features.clone(),
        )
    }

    pub fn dispatcher(&self, sink: Arc<dyn ResultSink>) -> StranglerDispatcher {
        StranglerDispatcher::new(
            Arc::new(self.pipeline()),
            self.config.modern_pipeline.clone(),
            sink,
        )
        .with_journal(self.journal.clone())
    }

    /// A background task dispatching `request`, applying results to `sink`.
    pub fn dispatch_task(&self, request: DispatchRequest, sink: Arc<dyn ResultSink>) -> DispatchTask {
        DispatchTask::new(request, Arc::new(self.dispatcher(sink)), Arc::new(self.legacy()))
    }

    pub fn evaluation_snapshot(&self, dataset_id: &str, expression: &str) -> Result<EvaluationSnapshot> {
        let descriptor = self.descriptor(dataset_id)?;
        Ok(EvaluationSnapshot::for_dataset(&descriptor, expression)
            .with_batch_size(self.config.evaluation.batch_size))
    }

    pub fn stats_snapshot(&self, raster_uri: &str, band: usize) -> RasterStatsSnapshot {
        RasterStatsSnapshot::new(raster_uri, band).with_sampling_policy(
            self.config.raster.large_raster_pixel_threshold,
            self.config.raster.default_sample_size,
        )
    }

    pub fn range_mask_snapshot(&self, raster_uri: &str, band: usize, min: f64, max: f64) -> RangeMaskSnapshot {
        RangeMaskSnapshot::new(raster_uri, band, min, max)
            .with_memory_output_limit(self.config.raster.memory_output_limit.as_u64())
    }

    /// At most one evaluation runs per dataset, a newer one cancels the older.
    pub fn submit_evaluation(
        &self,
        snapshot: EvaluationSnapshot,
        callbacks: TaskCallbacks<EvaluationResult>,
    ) -> TaskHandle {
        let key = format!("evaluation:{}", snapshot.dataset_id);
        let task = ExpressionEvaluationTask::new(snapshot, self.features.clone());
        self.scheduler.submit_exclusive(key, task, callbacks)
    }
}
