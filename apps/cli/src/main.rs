//! tweetsent CLI - fine-tune and run a stock-tweet sentiment classifier
//!
//! Running `tweetsent` with no subcommand prepares the dataset, trains the
//! model and publishes it, all from the resolved configuration.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::{PredictArgs, PrepareArgs, TrainArgs};
use commands::{predict, prepare, train};

/// tweetsent - sentiment fine-tuning for stock tweets
#[derive(Parser, Debug)]
#[command(
    name = "tweetsent",
    author,
    version,
    about = "Fine-tune a pretrained checkpoint for stock tweet sentiment",
    args_conflicts_with_subcommands = true
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Options for the default train run
    #[command(flatten)]
    train: TrainArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prepare the dataset, train, save and publish (the default)
    Train(TrainArgs),

    /// Fetch, split and tokenize the dataset, then report its shape
    Prepare(PrepareArgs),

    /// Classify texts with a saved model directory
    Predict(PredictArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so `--json` output on stdout stays parseable.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Some(Command::Train(train_args)) => train::execute(train_args).await,
        Some(Command::Prepare(prepare_args)) => prepare::execute(prepare_args).await,
        Some(Command::Predict(predict_args)) => predict::execute(predict_args).await,
        None => train::execute(args.train).await,
    }
}
