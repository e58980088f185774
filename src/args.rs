use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tessera_filter_types::dialect::Dialect;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(long, help = "Whether to log as JSON lines.")]
    pub log_json: bool,

    #[clap(
        short,
        long,
        help = "Path to a JSON config file. Every field has a default when omitted."
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the expression a saved filter chain synthesizes.
    Build {
        #[clap(long, help = "Path to a structured chain document (JSON).")]
        chain: PathBuf,

        #[clap(long, default_value = "postgresql", help = "Target dialect.")]
        dialect: Dialect,
    },

    /// Compute statistics of one raster band, sampling large rasters.
    Stats {
        #[clap(long)]
        raster: PathBuf,

        #[clap(long, default_value_t = 1)]
        band: usize,

        #[clap(long, help = "Sample this many pixels instead of following the sampling policy.")]
        sample_size: Option<u64>,
    },

    /// Copy a raster and derive transparency rules hiding values outside a range.
    Mask {
        #[clap(long)]
        raster: PathBuf,

        #[clap(long, default_value_t = 1)]
        band: usize,

        #[clap(long, allow_negative_numbers = true)]
        min: f64,

        #[clap(long, allow_negative_numbers = true)]
        max: f64,

        #[clap(long, help = "Directory for file-backed outputs.", default_value = ".")]
        output_dir: PathBuf,
    },

    /// Clip a raster by the polygons of a vector dataset.
    Clip {
        #[clap(long)]
        raster: PathBuf,

        #[clap(long, help = "Path to a JSON array of datasets.")]
        datasets: PathBuf,

        #[clap(long, help = "Id of the polygon dataset to clip by.")]
        mask: String,

        #[clap(long)]
        output: PathBuf,

        #[clap(long, help = "Shrink the output to the mask's extent.")]
        crop: bool,

        #[clap(long, help = "Keep every cell the mask touches, not just those centered in it.")]
        all_touched: bool,
    },

    /// Evaluate an attribute expression over a dataset.
    Evaluate {
        #[clap(long, help = "Path to a JSON array of datasets.")]
        datasets: PathBuf,

        #[clap(long)]
        dataset: String,

        #[clap(long)]
        expression: String,

        #[clap(long, value_delimiter = ',', help = "Attributes to project, ids only when unset.")]
        fields: Option<Vec<String>>,

        #[clap(long)]
        limit: Option<usize>,
    },

    /// Run a filter request, modern pipeline first, applying results to the datasets file.
    Dispatch {
        #[clap(long, help = "Path to a JSON array of datasets.")]
        datasets: PathBuf,

        #[clap(long, help = "Path to a JSON dispatch request.")]
        request: PathBuf,
    },
}

#[must_use]
pub fn parse_args() -> Args {
    Args::parse()
}
