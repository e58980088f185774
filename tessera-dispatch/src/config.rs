use std::path::Path;

use bytesize::ByteSize;
use color_eyre::eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tessera_common::bytesize_utils::{deserialize_bytesize, serialize_bytesize};
use tessera_filter_types::descriptor::ProviderKind;
use tessera_tasks::tasks::{DEFAULT_LARGE_RASTER_PIXEL_THRESHOLD, DEFAULT_SAMPLE_SIZE};

const DEFAULT_MEMORY_OUTPUT_LIMIT: ByteSize = ByteSize::mib(256);
const DEFAULT_MATERIALIZED_VIEW_SCHEMA: &str = "tessera_temp";
const DEFAULT_EVALUATION_BATCH_SIZE: usize = 1000;

fn default_true() -> bool {
    true
}

fn default_incomplete_spatial_backends() -> Vec<ProviderKind> {
    vec![ProviderKind::Spatialite]
}

fn default_memory_output_limit() -> ByteSize {
    DEFAULT_MEMORY_OUTPUT_LIMIT
}

fn default_large_raster_pixel_threshold() -> u64 {
    DEFAULT_LARGE_RASTER_PIXEL_THRESHOLD
}

fn default_sample_size() -> u64 {
    DEFAULT_SAMPLE_SIZE
}

fn default_schema() -> String {
    DEFAULT_MATERIALIZED_VIEW_SCHEMA.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_EVALUATION_BATCH_SIZE
}

/// Which backends exist in this process. Resolved once, when the config is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendAvailability {
    #[serde(default = "default_true")]
    pub postgresql: bool,
    #[serde(default = "default_true")]
    pub spatialite: bool,
    #[serde(default = "default_true")]
    pub memory: bool,
}

impl Default for BackendAvailability {
    fn default() -> Self {
        Self {
            postgresql: true,
            spatialite: true,
            memory: true,
        }
    }
}

impl BackendAvailability {
    /// Whether the relational builder can serve datasets of `provider`.
    pub fn relational(&self, provider: ProviderKind) -> bool {
        match provider {
            ProviderKind::Postgresql => self.postgresql,
            ProviderKind::Spatialite => self.spatialite,
            ProviderKind::Ogr | ProviderKind::Memory => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModernPipelineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub multi_step: bool,
    #[serde(default = "default_true")]
    pub export: bool,

    /// Providers whose modern spatial SQL generation is known to be incomplete. Multi-step
    /// requests touching any of them go to the legacy path.
    #[serde(default = "default_incomplete_spatial_backends")]
    pub incomplete_spatial_backends: Vec<ProviderKind>,
}

impl Default for ModernPipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            multi_step: true,
            export: true,
            incomplete_spatial_backends: default_incomplete_spatial_backends(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterConfig {
    /// Range mask outputs estimated above this size are written to files.
    #[serde(
        default = "default_memory_output_limit",
        serialize_with = "serialize_bytesize",
        deserialize_with = "deserialize_bytesize"
    )]
    pub memory_output_limit: ByteSize,

    #[serde(default = "default_large_raster_pixel_threshold")]
    pub large_raster_pixel_threshold: u64,

    #[serde(default = "default_sample_size")]
    pub default_sample_size: u64,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            memory_output_limit: DEFAULT_MEMORY_OUTPUT_LIMIT,
            large_raster_pixel_threshold: DEFAULT_LARGE_RASTER_PIXEL_THRESHOLD,
            default_sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedViewConfig {
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl Default for MaterializedViewConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool size, 0 meaning the available parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub backends: BackendAvailability,
    #[serde(default)]
    pub modern_pipeline: ModernPipelineConfig,
    #[serde(default)]
    pub raster: RasterConfig,
    #[serde(default)]
    pub materialized_views: MaterializedViewConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.evaluation.batch_size == 0 {
            bail!("evaluation.batch_size must be positive");
        }
        if self.raster.default_sample_size == 0 {
            bail!("raster.default_sample_size must be positive");
        }
        if self.materialized_views.schema.trim().is_empty() {
            bail!("materialized_views.schema must not be empty");
        }
        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;

    Config::parse(&content).with_context(|| format!("invalid config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.raster.memory_output_limit, ByteSize::mib(256));
        assert_eq!(
            config.modern_pipeline.incomplete_spatial_backends,
            vec![ProviderKind::Spatialite]
        );
        assert_eq!(config.materialized_views.schema, "tessera_temp");
        assert_eq!(config.evaluation.batch_size, 1000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"{
                "workers": 3,
                "backends": {"postgresql": false},
                "modern_pipeline": {"multi_step": false, "incomplete_spatial_backends": []},
                "raster": {"memory_output_limit": "1 MiB"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.workers, 3);
        assert!(!config.backends.postgresql);
        assert!(config.backends.memory);
        assert!(config.modern_pipeline.enabled);
        assert!(!config.modern_pipeline.multi_step);
        assert!(config.modern_pipeline.incomplete_spatial_backends.is_empty());
        assert_eq!(config.raster.memory_output_limit, ByteSize::mib(1));
        assert_eq!(config.raster.default_sample_size, DEFAULT_SAMPLE_SIZE);
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(Config::parse(r#"{"evaluation": {"batch_size": 0}}"#).is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"materialized_views": {{"schema": "scratch"}}}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.materialized_views.schema, "scratch");
        assert!(load_config(file.path().with_extension("missing")).is_err());
    }
}
