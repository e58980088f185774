use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::new_snapshot_id;
use crate::{
    context::TaskContext,
    error::TaskError,
    raster::{FileRasterCatalog, MemoryRasterCatalog, RasterCatalog},
    stats::{BandStatistics, RunningStats},
    task::{BackgroundTask, TaskKind},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMaskSnapshot {
    pub id: String,
    pub raster_uri: String,
    pub band: usize,
    pub min: f64,
    pub max: f64,
    /// Outputs estimated above this many bytes are written to a file.
    pub memory_output_limit: u64,
}

impl RangeMaskSnapshot {
    pub fn new(raster_uri: impl Into<String>, band: usize, min: f64, max: f64) -> Self {
        Self {
            id: new_snapshot_id("range-mask"),
            raster_uri: raster_uri.into(),
            band,
            min,
            max,
            memory_output_limit: 256 * 1024 * 1024,
        }
    }

    pub fn with_memory_output_limit(mut self, limit: u64) -> Self {
        self.memory_output_limit = limit;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStrategy {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterOutput {
    pub strategy: OutputStrategy,
    pub uri: String,
}

/// Values in `[min, max]` are rendered transparent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransparencyRule {
    pub min: f64,
    pub max: f64,
}

/// Rules hiding the parts of `[data_min, data_max]` outside `[min, max]`. Empty when the
/// requested range already covers the data.
pub fn transparency_rules(data_min: f64, data_max: f64, min: f64, max: f64) -> Vec<TransparencyRule> {
    let mut rules = Vec::new();
    if min <= data_min && max >= data_max {
        return rules;
    }

    // A bound outside the data hides everything up to the data edge, inclusive.
    if data_min < min {
        rules.push(TransparencyRule {
            min: data_min,
            max: if min <= data_max { min.next_down() } else { data_max },
        });
    }
    if data_max > max {
        rules.push(TransparencyRule {
            min: if max >= data_min { max.next_up() } else { data_min },
            max: data_max,
        });
    }
    rules
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMaskResult {
    pub output: RasterOutput,
    pub band: usize,
    pub statistics: Option<BandStatistics>,
    pub rules: Vec<TransparencyRule>,
}

/// Copies a raster and derives transparency rules for a value range. The source is never
/// modified.
pub struct RangeMaskTask {
    snapshot: RangeMaskSnapshot,
    source: Arc<dyn RasterCatalog>,
    memory_output: MemoryRasterCatalog,
    file_output: FileRasterCatalog,
    written: Option<RasterOutput>,
}

impl RangeMaskTask {
    pub fn new(
        snapshot: RangeMaskSnapshot,
        source: Arc<dyn RasterCatalog>,
        memory_output: MemoryRasterCatalog,
        file_output: FileRasterCatalog,
    ) -> Self {
        Self {
            snapshot,
            source,
            memory_output,
            file_output,
            written: None,
        }
    }

    fn output_for(&self, strategy: OutputStrategy) -> RasterOutput {
        let uri = match strategy {
            OutputStrategy::Memory => format!("mem://{}", self.snapshot.id),
            OutputStrategy::File => format!("{}.tsr", self.snapshot.id),
        };
        RasterOutput { strategy, uri }
    }

    fn catalog(&self, strategy: OutputStrategy) -> &dyn RasterCatalog {
        match strategy {
            OutputStrategy::Memory => &self.memory_output,
            OutputStrategy::File => &self.file_output,
        }
    }
}

impl BackgroundTask for RangeMaskTask {
    type Output = RangeMaskResult;

    fn kind(&self) -> TaskKind {
        TaskKind::RasterRangeMask
    }

    fn snapshot_id(&self) -> String {
        self.snapshot.id.clone()
    }

    #[instrument(skip_all, fields(raster = %self.snapshot.raster_uri, band = self.snapshot.band))]
    fn run(&mut self, ctx: &TaskContext) -> Result<RangeMaskResult, TaskError> {
        let (min, max) = (self.snapshot.min, self.snapshot.max);
        if min.is_nan() || max.is_nan() || min > max {
            return Err(TaskError::InvalidInput(format!("invalid value range [{min}, {max}]")));
        }

        let copy = self.source.open(&self.snapshot.raster_uri)?;
        copy.band(self.snapshot.band)?;
        ctx.check_cancelled()?;

        let strategy = if copy.estimated_size() <= self.snapshot.memory_output_limit {
            OutputStrategy::Memory
        } else {
            OutputStrategy::File
        };
        let output = self.output_for(strategy);
        info!(?strategy, estimated_size = copy.estimated_size(), "Writing range mask copy");

        self.written = Some(output.clone());
        self.catalog(strategy).store(&output.uri, &copy)?;

        let band = copy.band(self.snapshot.band)?;
        let width = copy.width.max(1) as usize;
        let height = copy.height as u64;
        let mut stats = RunningStats::default();
        for (row, values) in band.chunks(width).enumerate() {
            ctx.check_cancelled()?;
            for value in values {
                if !copy.is_nodata(*value) {
                    stats.push(*value);
                }
            }
            ctx.set_progress(row as u64 + 1, height);
        }

        ctx.finish_progress();

        let statistics = stats.finish();
        let rules = match statistics {
            Some(s) => transparency_rules(s.min, s.max, min, max),
            None => Vec::new(),
        };
        debug!(rules = rules.len(), "Derived transparency rules");

        Ok(RangeMaskResult {
            output,
            band: self.snapshot.band,
            statistics,
            rules,
        })
    }

    fn cleanup(&mut self) {
        if let Some(output) = self.written.take()
            && let Err(e) = self.catalog(output.strategy).remove(&output.uri)
        {
            warn!(uri = output.uri, "Failed to remove partial range mask output: {e}");
        }
    }
}
