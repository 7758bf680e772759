use crate::artifacts::TrainingArtifact;
use crate::collator::Batch;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{ComputeDevice, ModelSpec};
use crate::metrics::{EvalPrediction, softmax};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::Path;

/// Optimizer settings for a single step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    pub learning_rate: f64,
    pub weight_decay: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EvalOutput {
    pub prediction: EvalPrediction,
    pub loss: f64,
}

/// A classification model that can be trained, queried and saved.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn id(&self) -> &'static str;

    fn model_spec(&self) -> ModelSpec;

    fn num_labels(&self) -> usize;

    fn device(&self) -> ComputeDevice;

    /// Hyperparameters written to the artifact's `config.json`, including
    /// `architectures` and `model_type`. Label maps are added by the caller.
    fn config_json(&self) -> Map<String, Value>;

    /// Run one optimizer step on `batch` and return its mean loss.
    async fn fit(&mut self, batch: &Batch, params: &StepParams) -> TrainingResult<f64>;

    /// Per-class logits for each row of `batch`.
    async fn predict(&self, batch: &Batch) -> TrainingResult<Vec<Vec<f32>>>;

    /// Logits and mean cross-entropy over a set of batches.
    async fn evaluate(&self, batches: &[Batch]) -> TrainingResult<EvalOutput> {
        let mut out = EvalOutput::default();
        let mut total_loss = 0.0;
        for batch in batches {
            let logits = self.predict(batch).await?;
            if logits.len() != batch.len() {
                return Err(TrainingError::Backend(format!(
                    "backend returned {} logit rows for a batch of {}",
                    logits.len(),
                    batch.len()
                )));
            }
            for (row, label) in logits.iter().zip(&batch.labels) {
                total_loss += cross_entropy(row, *label)?;
            }
            out.prediction.labels.extend_from_slice(&batch.labels);
            out.prediction.logits.extend(logits);
        }
        if !out.prediction.labels.is_empty() {
            out.loss = total_loss / out.prediction.labels.len() as f64;
        }
        Ok(out)
    }

    /// Write model weights and config into `dir`.
    async fn save(&self, dir: &Path) -> TrainingResult<Vec<TrainingArtifact>>;
}

/// Negative log-likelihood of `label` under softmax(`logits`).
pub fn cross_entropy(logits: &[f32], label: u32) -> TrainingResult<f64> {
    let probs = softmax(logits);
    let p = probs
        .get(label as usize)
        .ok_or_else(|| TrainingError::Backend(format!("label {label} out of range for {} classes", logits.len())))?;
    Ok(-f64::from(p.max(f32::MIN_POSITIVE)).ln())
}
