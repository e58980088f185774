mod clip;
mod evaluation;
mod range_mask;
mod raster_stats;
mod selection;

pub use clip::{
    ClipOptions, ClipProcessor, ClipResult, ClipSnapshot, ClipTask, EnvelopeClipProcessor,
};
pub use evaluation::{EvaluationResult, EvaluationSnapshot, ExpressionEvaluationTask};
pub use range_mask::{
    OutputStrategy, RangeMaskResult, RangeMaskSnapshot, RangeMaskTask, RasterOutput,
    TransparencyRule, transparency_rules,
};
pub use raster_stats::{
    DEFAULT_LARGE_RASTER_PIXEL_THRESHOLD, DEFAULT_SAMPLE_SIZE, RasterStatistics,
    RasterStatisticsTask, RasterStatsSnapshot,
};
pub use selection::{SpatialSelectionOutput, SpatialSelectionSnapshot, SpatialSelectionTask};

use uuid::Uuid;

fn new_snapshot_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7())
}
