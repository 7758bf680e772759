use crate::job::RunId;
use crate::metrics::MetricMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: RunId, epochs: u32, steps_per_epoch: u64 },
    Log { run_id: RunId, epoch: u32, step: u64, train_loss: f64 },
    Evaluated { run_id: RunId, epoch: u32, step: u64, eval_loss: f64, metrics: MetricMap },
    Checkpoint { run_id: RunId, step: u64, path: PathBuf },
    Finished { run_id: RunId, steps: u64 },
    Published { run_id: RunId, repo_url: String },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

fn format_metrics(metrics: &MetricMap) -> String {
    metrics
        .iter()
        .map(|(k, v)| format!("{k}={v:.4}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, epochs, steps_per_epoch } => {
                println!("[train:{run_id}] started ({epochs} epochs x {steps_per_epoch} steps)");
            }
            ProgressEvent::Log { run_id, epoch, step, train_loss } => {
                println!("[train:{run_id}] epoch {epoch} step {step} loss {train_loss:.4}");
            }
            ProgressEvent::Evaluated { run_id, epoch, step, eval_loss, metrics } => {
                println!(
                    "[train:{run_id}] eval epoch {epoch} step {step} loss {eval_loss:.4} {}",
                    format_metrics(&metrics)
                );
            }
            ProgressEvent::Checkpoint { run_id, step, path } => {
                println!("[train:{run_id}] checkpoint {step} -> {}", path.display());
            }
            ProgressEvent::Finished { run_id, steps } => println!("[train:{run_id}] finished after {steps} steps"),
            ProgressEvent::Published { run_id, repo_url } => println!("[train:{run_id}] published to {repo_url}"),
        }
    }
}

/// Forwards progress to `tracing` at info level.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, epochs, steps_per_epoch } => {
                tracing::info!(%run_id, epochs, steps_per_epoch, "training started");
            }
            ProgressEvent::Log { run_id, epoch, step, train_loss } => {
                tracing::info!(%run_id, epoch, step, train_loss, "train");
            }
            ProgressEvent::Evaluated { run_id, epoch, step, eval_loss, metrics } => {
                tracing::info!(%run_id, epoch, step, eval_loss, metrics = %format_metrics(&metrics), "eval");
            }
            ProgressEvent::Checkpoint { run_id, step, path } => {
                tracing::info!(%run_id, step, path = %path.display(), "checkpoint saved");
            }
            ProgressEvent::Finished { run_id, steps } => tracing::info!(%run_id, steps, "training finished"),
            ProgressEvent::Published { run_id, repo_url } => tracing::info!(%run_id, %repo_url, "published"),
        }
    }
}
