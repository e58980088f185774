use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tessera_backends::registry::{DatasetRegistry, FeatureSource};
use tessera_filter_types::{DatasetId, spatial::{Envelope, GeometryType}};
use tracing::{info, instrument, warn};

use super::new_snapshot_id;
use crate::{
    context::TaskContext,
    error::TaskError,
    raster::{FileRasterCatalog, RasterCatalog, RasterData},
    task::{BackgroundTask, TaskKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClipOptions {
    /// Shrink the output extent to the mask's bounds.
    pub crop_to_mask: bool,
    /// Keep every cell touching the mask, instead of only cells whose center is inside.
    pub all_touched: bool,
}

/// Clips a raster to a polygon mask. `progress` receives the fraction done and returns false
/// to abort.
pub trait ClipProcessor: Send + Sync {
    fn clip(
        &self,
        raster: &RasterData,
        mask: &[Envelope],
        options: ClipOptions,
        progress: &mut dyn FnMut(f64) -> bool,
    ) -> Result<RasterData, TaskError>;
}

/// Treats every mask polygon as its bounding envelope.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvelopeClipProcessor;

impl EnvelopeClipProcessor {
    /// Column and row ranges of the cells intersecting `bounds`.
    fn window(raster: &RasterData, bounds: &Envelope) -> Option<(u32, u32, u32, u32)> {
        let overlap = raster.extent.intersection_area(bounds);
        if overlap <= 0.0 {
            return None;
        }

        let (pw, ph) = (raster.pixel_width(), raster.pixel_height());
        let col_of = |x: f64| ((x - raster.extent.min_x) / pw).clamp(0.0, f64::from(raster.width));
        let row_of = |y: f64| ((raster.extent.max_y - y) / ph).clamp(0.0, f64::from(raster.height));

        let c0 = col_of(bounds.min_x).floor() as u32;
        let c1 = col_of(bounds.max_x).ceil() as u32;
        let r0 = row_of(bounds.max_y).floor() as u32;
        let r1 = row_of(bounds.min_y).ceil() as u32;
        (c0 < c1 && r0 < r1).then_some((c0, c1, r0, r1))
    }
}

impl ClipProcessor for EnvelopeClipProcessor {
    fn clip(
        &self,
        raster: &RasterData,
        mask: &[Envelope],
        options: ClipOptions,
        progress: &mut dyn FnMut(f64) -> bool,
    ) -> Result<RasterData, TaskError> {
        if raster.width == 0 || raster.height == 0 {
            return Err(TaskError::InvalidInput(format!(
                "cannot clip an empty {}x{} raster",
                raster.width, raster.height
            )));
        }
        let Some(bounds) = mask.iter().copied().reduce(|a, b| a.union(&b)) else {
            return Err(TaskError::InvalidInput("mask has no geometries".to_string()));
        };

        let (c0, c1, r0, r1) = if options.crop_to_mask {
            Self::window(raster, &bounds).ok_or_else(|| {
                TaskError::InvalidInput("mask does not overlap the raster".to_string())
            })?
        } else {
            (0, raster.width, 0, raster.height)
        };

        let fill = raster.nodata.unwrap_or(f64::NAN);
        let (width, height) = (c1 - c0, r1 - r0);
        let mut bands = vec![Vec::with_capacity((width * height) as usize); raster.bands.len()];

        for row in r0..r1 {
            if !progress(f64::from(row - r0) / f64::from(height)) {
                return Err(TaskError::Cancelled);
            }

            for col in c0..c1 {
                let cell = raster.cell_envelope(col, row);
                let inside = if options.all_touched {
                    mask.iter().any(|m| m.intersection_area(&cell) > 0.0)
                } else {
                    let (cx, cy) = ((cell.min_x + cell.max_x) / 2.0, (cell.min_y + cell.max_y) / 2.0);
                    mask.iter().any(|m| m.contains_point(cx, cy))
                };

                let index = (row * raster.width + col) as usize;
                for (out, band) in bands.iter_mut().zip(&raster.bands) {
                    out.push(if inside { band[index] } else { fill });
                }
            }
        }
        progress(1.0);

        let top_left = raster.cell_envelope(c0, r0);
        let bottom_right = raster.cell_envelope(c1 - 1, r1 - 1);
        Ok(RasterData {
            width,
            height,
            nodata: raster.nodata,
            extent: top_left.union(&bottom_right),
            bands,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSnapshot {
    pub id: String,
    pub raster_uri: String,
    pub mask_dataset_id: DatasetId,
    pub options: ClipOptions,
    /// Where the clipped raster is written, relative to the output catalog.
    pub output_uri: String,
}

impl ClipSnapshot {
    pub fn new(
        raster_uri: impl Into<String>,
        mask_dataset_id: impl Into<DatasetId>,
        output_uri: impl Into<String>,
    ) -> Self {
        Self {
            id: new_snapshot_id("clip"),
            raster_uri: raster_uri.into(),
            mask_dataset_id: mask_dataset_id.into(),
            options: ClipOptions::default(),
            output_uri: output_uri.into(),
        }
    }

    pub fn with_options(mut self, options: ClipOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipResult {
    pub output_uri: String,
    pub width: u32,
    pub height: u32,
}

pub struct ClipTask {
    snapshot: ClipSnapshot,
    rasters: Arc<dyn RasterCatalog>,
    registry: Arc<dyn DatasetRegistry>,
    features: Arc<dyn FeatureSource>,
    processor: Arc<dyn ClipProcessor>,
    output: FileRasterCatalog,
    output_started: bool,
}

impl ClipTask {
    pub fn new(
        snapshot: ClipSnapshot,
        rasters: Arc<dyn RasterCatalog>,
        registry: Arc<dyn DatasetRegistry>,
        features: Arc<dyn FeatureSource>,
        processor: Arc<dyn ClipProcessor>,
        output: FileRasterCatalog,
    ) -> Self {
        Self {
            snapshot,
            rasters,
            registry,
            features,
            processor,
            output,
            output_started: false,
        }
    }
}

impl BackgroundTask for ClipTask {
    type Output = ClipResult;

    fn kind(&self) -> TaskKind {
        TaskKind::RasterClip
    }

    fn snapshot_id(&self) -> String {
        self.snapshot.id.clone()
    }

    #[instrument(skip_all, fields(raster = %self.snapshot.raster_uri, mask = %self.snapshot.mask_dataset_id))]
    fn run(&mut self, ctx: &TaskContext) -> Result<ClipResult, TaskError> {
        let mask_id = &self.snapshot.mask_dataset_id;
        let mask = self
            .registry
            .resolve(mask_id)
            .ok_or_else(|| TaskError::Resource(format!("mask dataset not found: {mask_id}")))?;
        if mask.geometry_type != GeometryType::Polygon {
            return Err(TaskError::InvalidInput(format!(
                "mask dataset {mask_id} is not a polygon layer ({:?})",
                mask.geometry_type
            )));
        }

        let raster = self.rasters.open(&self.snapshot.raster_uri)?;
        let mask: Vec<Envelope> = self
            .features
            .open(mask_id)?
            .into_iter()
            .map(|f| f.envelope)
            .collect();
        ctx.check_cancelled()?;

        let mut hook = |fraction: f64| {
            ctx.set_progress((fraction * 1000.0) as u64, 1000);
            !ctx.is_cancelled()
        };
        let clipped = self
            .processor
            .clip(&raster, &mask, self.snapshot.options, &mut hook)?;
        ctx.check_cancelled()?;

        self.output_started = true;
        self.output.store(&self.snapshot.output_uri, &clipped)?;
        info!(output = self.snapshot.output_uri, width = clipped.width, height = clipped.height, "Clipped raster");

        Ok(ClipResult {
            output_uri: self.snapshot.output_uri.clone(),
            width: clipped.width,
            height: clipped.height,
        })
    }

    fn cleanup(&mut self) {
        if self.output_started
            && let Err(e) = self.output.remove(&self.snapshot.output_uri)
        {
            warn!(output = self.snapshot.output_uri, "Failed to remove partial clip output: {e}");
        }
    }
}
