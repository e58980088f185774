use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tessera_filter_types::spatial::Envelope;
use thiserror::Error;
use tracing::debug;

use crate::error::TaskError;

const MAGIC: &[u8; 4] = b"TSRA";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4 + 4 + 2 + 1 + 8 + 4 * 8;

/// Size estimate used for output strategy decisions, 4 bytes per sample.
pub const ESTIMATED_BYTES_PER_SAMPLE: u64 = 4;

#[derive(Debug, Error)]
pub enum RasterFormatError {
    #[error("not a raster file (bad magic)")]
    BadMagic,

    #[error("unsupported raster format version {0}")]
    UnsupportedVersion(u16),

    #[error("truncated raster file: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// A multi band grid of samples, row major within each band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterData {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub nodata: Option<f64>,
    pub extent: Envelope,
    pub bands: Vec<Vec<f64>>,
}

impl RasterData {
    pub fn new(width: u32, height: u32, extent: Envelope, bands: Vec<Vec<f64>>) -> Self {
        Self {
            width,
            height,
            nodata: None,
            extent,
            bands,
        }
    }

    pub fn with_nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn estimated_size(&self) -> u64 {
        self.pixel_count() * self.bands.len() as u64 * ESTIMATED_BYTES_PER_SAMPLE
    }

    pub fn pixel_width(&self) -> f64 {
        self.extent.width() / f64::from(self.width.max(1))
    }

    pub fn pixel_height(&self) -> f64 {
        self.extent.height() / f64::from(self.height.max(1))
    }

    /// Envelope of the cell at `(col, row)`, row 0 being the top.
    pub fn cell_envelope(&self, col: u32, row: u32) -> Envelope {
        let (pw, ph) = (self.pixel_width(), self.pixel_height());
        let min_x = self.extent.min_x + f64::from(col) * pw;
        let max_y = self.extent.max_y - f64::from(row) * ph;
        Envelope::new(min_x, max_y - ph, min_x + pw, max_y)
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nodata| nodata == value)
    }

    /// Band by 1-based index, the way users number bands.
    pub fn band(&self, index: usize) -> Result<&[f64], TaskError> {
        index
            .checked_sub(1)
            .and_then(|i| self.bands.get(i))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                TaskError::InvalidInput(format!(
                    "band {index} out of range, raster has {} bands",
                    self.bands.len()
                ))
            })
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        let expected = self.pixel_count() as usize;
        if let Some((i, band)) = self.bands.iter().enumerate().find(|(_, b)| b.len() != expected) {
            return Err(TaskError::Resource(format!(
                "band {} has {} samples, expected {expected}",
                i + 1,
                band.len()
            )));
        }
        Ok(())
    }

    pub fn encode(&self) -> Bytes {
        let samples: usize = self.bands.iter().map(Vec::len).sum();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + samples * 8);

        buf.put_slice(MAGIC);
        buf.put_u16_le(FORMAT_VERSION);
        buf.put_u32_le(self.width);
        buf.put_u32_le(self.height);
        buf.put_u16_le(self.bands.len() as u16);
        buf.put_u8(u8::from(self.nodata.is_some()));
        buf.put_f64_le(self.nodata.unwrap_or(0.0));
        buf.put_f64_le(self.extent.min_x);
        buf.put_f64_le(self.extent.min_y);
        buf.put_f64_le(self.extent.max_x);
        buf.put_f64_le(self.extent.max_y);

        for band in &self.bands {
            for value in band {
                buf.put_f64_le(*value);
            }
        }

        buf.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, RasterFormatError> {
        if buf.len() < HEADER_LEN {
            return Err(RasterFormatError::Truncated {
                expected: HEADER_LEN,
                actual: buf.len(),
            });
        }

        let magic = buf.split_to(4);
        if magic.as_ref() != MAGIC {
            return Err(RasterFormatError::BadMagic);
        }
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(RasterFormatError::UnsupportedVersion(version));
        }

        let width = buf.get_u32_le();
        let height = buf.get_u32_le();
        let band_count = usize::from(buf.get_u16_le());
        let has_nodata = buf.get_u8() != 0;
        let nodata = buf.get_f64_le();
        let extent = Envelope::new(
            buf.get_f64_le(),
            buf.get_f64_le(),
            buf.get_f64_le(),
            buf.get_f64_le(),
        );

        let per_band = width as usize * height as usize;
        let expected = per_band * band_count * 8;
        if buf.remaining() < expected {
            return Err(RasterFormatError::Truncated {
                expected: HEADER_LEN + expected,
                actual: HEADER_LEN + buf.remaining(),
            });
        }

        let bands = (0..band_count)
            .map(|_| (0..per_band).map(|_| buf.get_f64_le()).collect())
            .collect();

        Ok(Self {
            width,
            height,
            nodata: has_nodata.then_some(nodata),
            extent,
            bands,
        })
    }
}

/// Reopens rasters by URI from a worker, and stores outputs.
pub trait RasterCatalog: Send + Sync {
    fn open(&self, uri: &str) -> Result<RasterData, TaskError>;

    fn store(&self, uri: &str, raster: &RasterData) -> Result<(), TaskError>;

    fn remove(&self, uri: &str) -> Result<(), TaskError>;

    fn exists(&self, uri: &str) -> bool;
}

/// Rasters held in memory, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryRasterCatalog {
    rasters: Arc<RwLock<HashMap<String, RasterData>>>,
}

impl MemoryRasterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, raster: RasterData) {
        self.rasters.write().insert(uri.into(), raster);
    }

    pub fn len(&self) -> usize {
        self.rasters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rasters.read().is_empty()
    }
}

impl RasterCatalog for MemoryRasterCatalog {
    fn open(&self, uri: &str) -> Result<RasterData, TaskError> {
        let raster = self
            .rasters
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| TaskError::Resource(format!("raster not found: {uri}")))?;
        raster.validate()?;
        Ok(raster)
    }

    fn store(&self, uri: &str, raster: &RasterData) -> Result<(), TaskError> {
        self.insert(uri, raster.clone());
        Ok(())
    }

    fn remove(&self, uri: &str) -> Result<(), TaskError> {
        self.rasters.write().remove(uri);
        Ok(())
    }

    fn exists(&self, uri: &str) -> bool {
        self.rasters.read().contains_key(uri)
    }
}

/// Rasters stored as files in the binary container format, URIs are paths.
#[derive(Debug, Clone, Default)]
pub struct FileRasterCatalog {
    root: Option<PathBuf>,
}

impl FileRasterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative URIs against `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn path(&self, uri: &str) -> PathBuf {
        let path = Path::new(uri);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl RasterCatalog for FileRasterCatalog {
    fn open(&self, uri: &str) -> Result<RasterData, TaskError> {
        let path = self.path(uri);
        let bytes = fs::read(&path)
            .map_err(|e| TaskError::Resource(format!("open raster {path:?}: {e}")))?;
        let raster = RasterData::decode(Bytes::from(bytes))
            .map_err(|e| TaskError::Resource(format!("read raster {path:?}: {e}")))?;
        raster.validate()?;
        Ok(raster)
    }

    fn store(&self, uri: &str, raster: &RasterData) -> Result<(), TaskError> {
        let path = self.path(uri);
        fs::write(&path, raster.encode())
            .map_err(|e| TaskError::Execution(format!("write raster {path:?}: {e}")))?;
        debug!(?path, "Stored raster");
        Ok(())
    }

    fn remove(&self, uri: &str) -> Result<(), TaskError> {
        let path = self.path(uri);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TaskError::Execution(format!("remove raster {path:?}: {e}"))),
        }
    }

    fn exists(&self, uri: &str) -> bool {
        self.path(uri).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> RasterData {
        RasterData::new(
            2,
            2,
            Envelope::new(0.0, 0.0, 2.0, 2.0),
            vec![vec![1.0, 2.0, 3.0, 4.0], vec![-1.0, f64::NAN, 0.5, 9.0]],
        )
        .with_nodata(-9999.0)
    }

    #[test]
    fn decode_what_was_encoded() {
        let raster = small();
        let decoded = RasterData::decode(raster.encode()).unwrap();
        assert_eq!(decoded.width, 2);
        assert_eq!(decoded.nodata, Some(-9999.0));
        assert_eq!(decoded.bands[0], raster.bands[0]);
        assert!(decoded.bands[1][1].is_nan());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            RasterData::decode(Bytes::from_static(&[0u8; 80])),
            Err(RasterFormatError::BadMagic)
        ));

        let mut truncated = small().encode();
        truncated.truncate(HEADER_LEN + 8);
        assert!(matches!(
            RasterData::decode(truncated),
            Err(RasterFormatError::Truncated { .. })
        ));
    }

    #[test]
    fn cell_envelopes_start_top_left() {
        let raster = small();
        assert_eq!(raster.cell_envelope(0, 0), Envelope::new(0.0, 1.0, 1.0, 2.0));
        assert_eq!(raster.cell_envelope(1, 1), Envelope::new(1.0, 0.0, 2.0, 1.0));
    }

    #[test]
    fn band_index_is_one_based() {
        let raster = small();
        assert_eq!(raster.band(1).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(matches!(raster.band(0), Err(TaskError::InvalidInput(_))));
        assert!(matches!(raster.band(3), Err(TaskError::InvalidInput(_))));
    }

    #[test]
    fn file_catalog_store_open_remove() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileRasterCatalog::rooted(dir.path());

        catalog.store("a.tsr", &small()).unwrap();
        assert!(catalog.exists("a.tsr"));
        assert_eq!(catalog.open("a.tsr").unwrap().bands[0], small().bands[0]);

        catalog.remove("a.tsr").unwrap();
        assert!(!catalog.exists("a.tsr"));
        catalog.remove("a.tsr").unwrap();
        assert!(matches!(catalog.open("a.tsr"), Err(TaskError::Resource(_))));
    }

    #[test]
    fn memory_catalog_rejects_short_bands() {
        let catalog = MemoryRasterCatalog::new();
        let mut raster = small();
        raster.bands[1].truncate(3);
        catalog.insert("short", raster);

        let Err(TaskError::Resource(message)) = catalog.open("short") else {
            panic!("expected a resource error");
        };
        assert!(message.contains("band 2 has 3 samples"));
    }
}
