//! Command argument types.

use clap::Args;
use std::path::PathBuf;

/// Where configuration comes from, plus per-run overrides.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// TOML configuration file (defaults to ./tweetsent.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Read rows from a local JSONL file instead of the Hub
    #[arg(long)]
    pub data_file: Option<PathBuf>,

    /// Override training.output_dir
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Override dataset.sample_size
    #[arg(long)]
    pub sample_size: Option<usize>,

    /// Use every row instead of sampling
    #[arg(long, conflicts_with = "sample_size")]
    pub no_sample: bool,

    /// Override training.epochs
    #[arg(long)]
    pub epochs: Option<u32>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TrainArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Keep the artifact local; never contact the registry
    #[arg(long)]
    pub no_push: bool,

    /// Print the training manifest as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PredictArgs {
    /// Saved model directory (a training output_dir)
    #[arg(short, long)]
    pub model_dir: PathBuf,

    /// Texts to classify
    #[arg(required = true)]
    pub texts: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}
