use once_cell::sync::Lazy;
use prometheus::{
    HistogramVec, IntCounterVec, IntGauge, exponential_buckets, register_histogram_vec,
    register_int_counter_vec, register_int_gauge,
};

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::default);

// Chain cache labels
pub const CACHE_HIT: &str = "hit";
pub const CACHE_MISS: &str = "miss";

// Backend labels
pub const BACKEND_RELATIONAL: &str = "relational";
pub const BACKEND_IN_MEMORY: &str = "in_memory";

// Backend operation labels
pub const OP_SPATIAL_JOIN: &str = "spatial_join";
pub const OP_SPATIAL_SELECTION: &str = "spatial_selection";
pub const OP_CREATE_SPATIAL_INDEX: &str = "create_spatial_index";

// Dispatch operation labels
pub const DISPATCH_ATTRIBUTE: &str = "attribute";
pub const DISPATCH_SPATIAL: &str = "spatial";
pub const DISPATCH_MULTI_STEP: &str = "multi_step";
pub const DISPATCH_EXPORT: &str = "export";

// Dispatch outcome labels
pub const OUTCOME_HANDLED_SUCCESS: &str = "handled_success";
pub const OUTCOME_HANDLED_FAILURE: &str = "handled_failure";
pub const OUTCOME_FALLBACK: &str = "fallback";

// Task outcome labels
pub const TASK_SUCCEEDED: &str = "succeeded";
pub const TASK_CANCELLED: &str = "cancelled";
pub const TASK_FAILED: &str = "failed";

pub struct Metrics {
    pub chain_builds_total: IntCounterVec,
    pub dispatch_outcomes_total: IntCounterVec,
    pub tasks_total: IntCounterVec,
    pub task_duration: HistogramVec,
    pub alive_workers: IntGauge,
    pub backend_operations_total: IntCounterVec,
}

/// From 0.01s to ~1500s
fn duration_buckets() -> Vec<f64> {
    exponential_buckets(0.01, 2.2, 16).unwrap()
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            chain_builds_total: register_int_counter_vec!(
                "tessera_chain_builds_total",
                "Number of filter chain expression builds",
                &["cache"],
            )
            .expect("create chain_builds_total"),

            dispatch_outcomes_total: register_int_counter_vec!(
                "tessera_dispatch_outcomes_total",
                "Outcomes of the modern pipeline dispatch",
                &["operation", "outcome"],
            )
            .expect("create dispatch_outcomes_total"),

            tasks_total: register_int_counter_vec!(
                "tessera_tasks_total",
                "Number of background tasks reaching a terminal state",
                &["kind", "outcome"],
            )
            .expect("create tasks_total"),

            task_duration: register_histogram_vec!(
                "tessera_task_duration_seconds",
                "Duration of background task bodies in seconds",
                &["kind"],
                duration_buckets(),
            )
            .expect("create task_duration"),

            alive_workers: register_int_gauge!(
                "tessera_alive_workers",
                "Number of task bodies currently executing on the worker pool",
            )
            .expect("create alive_workers"),

            backend_operations_total: register_int_counter_vec!(
                "tessera_backend_operations_total",
                "Number of spatial query builder operations",
                &["backend", "operation"],
            )
            .expect("create backend_operations_total"),
        }
    }
}
