use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::new_snapshot_id;
use crate::{
    context::TaskContext,
    error::TaskError,
    raster::RasterCatalog,
    stats::{BandStatistics, RunningStats},
    task::{BackgroundTask, TaskKind},
};

/// Rasters above this many pixels are sampled unless told otherwise.
pub const DEFAULT_LARGE_RASTER_PIXEL_THRESHOLD: u64 = 10_000_000;
pub const DEFAULT_SAMPLE_SIZE: u64 = 1_000_000;

const CHECK_INTERVAL: u64 = 65_536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterStatsSnapshot {
    pub id: String,
    pub raster_uri: String,
    pub band: usize,
    /// Explicit number of samples. Below the total pixel count it forces sampling.
    pub sample_size: Option<u64>,
    pub large_raster_pixel_threshold: u64,
    pub default_sample_size: u64,
}

impl RasterStatsSnapshot {
    pub fn new(raster_uri: impl Into<String>, band: usize) -> Self {
        Self {
            id: new_snapshot_id("raster-stats"),
            raster_uri: raster_uri.into(),
            band,
            sample_size: None,
            large_raster_pixel_threshold: DEFAULT_LARGE_RASTER_PIXEL_THRESHOLD,
            default_sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    pub fn with_sample_size(mut self, sample_size: u64) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    pub fn with_sampling_policy(mut self, threshold: u64, default_sample_size: u64) -> Self {
        self.large_raster_pixel_threshold = threshold;
        self.default_sample_size = default_sample_size;
        self
    }

    /// How many samples to take out of `total` pixels, `None` meaning a full scan.
    fn planned_samples(&self, total: u64) -> Option<u64> {
        match self.sample_size {
            Some(n) => (n > 0 && n < total).then_some(n),
            None if total > self.large_raster_pixel_threshold && total > 1 => {
                Some(self.default_sample_size.clamp(1, total - 1))
            }
            None => None,
        }
    }
}

/// Sampled statistics are approximate, `was_sampled` tells callers which they got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterStatistics {
    pub raster_uri: String,
    pub band: usize,
    /// `None` when every visited sample was nodata.
    pub statistics: Option<BandStatistics>,
    pub was_sampled: bool,
    /// Number of pixels visited.
    pub sample_size: u64,
    pub total_pixels: u64,
}

pub struct RasterStatisticsTask {
    snapshot: RasterStatsSnapshot,
    catalog: Arc<dyn RasterCatalog>,
}

impl RasterStatisticsTask {
    pub fn new(snapshot: RasterStatsSnapshot, catalog: Arc<dyn RasterCatalog>) -> Self {
        Self { snapshot, catalog }
    }
}

impl BackgroundTask for RasterStatisticsTask {
    type Output = RasterStatistics;

    fn kind(&self) -> TaskKind {
        TaskKind::RasterStatistics
    }

    fn snapshot_id(&self) -> String {
        self.snapshot.id.clone()
    }

    #[instrument(skip_all, fields(raster = %self.snapshot.raster_uri, band = self.snapshot.band))]
    fn run(&mut self, ctx: &TaskContext) -> Result<RasterStatistics, TaskError> {
        let raster = self.catalog.open(&self.snapshot.raster_uri)?;
        let band = raster.band(self.snapshot.band)?;
        ctx.check_cancelled()?;

        let total = raster.pixel_count();
        let planned = self.snapshot.planned_samples(total);
        let stride = planned.map_or(1, |n| total.div_ceil(n));

        let mut stats = RunningStats::default();
        let mut visited = 0u64;
        let mut index = 0u64;
        while index < total {
            if visited % CHECK_INTERVAL == 0 {
                ctx.check_cancelled()?;
                ctx.set_progress(index, total);
            }

            let value = band[index as usize];
            if !raster.is_nodata(value) {
                stats.push(value);
            }
            visited += 1;
            index += stride;
        }
        ctx.set_progress(total, total);

        debug!(total, visited, stride, "Computed raster statistics");

        Ok(RasterStatistics {
            raster_uri: self.snapshot.raster_uri.clone(),
            band: self.snapshot.band,
            statistics: stats.finish(),
            was_sampled: planned.is_some(),
            sample_size: visited,
            total_pixels: total,
        })
    }
}
