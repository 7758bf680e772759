//! Building backends, encoders and pipelines from configuration.

use crate::checkpoint::{CheckpointFiles, TOKENIZER_FILE};
use crate::classifier::{BACKEND_ID as DISTILBERT, DistilBertBackend};
use crate::distilbert::{ARCHITECTURE, MODEL_TYPE};
use crate::tokenizer::HfTokenizerEncoder;
use std::path::Path;
use std::sync::Arc;
use tweetsent_training::{
    ArtifactConfig, ModelBackend, ModelConfig, ModelSpec, TextClassificationPipeline, TrainingError, TrainingResult,
};

/// Backend named by `config.backend`, with a fresh head of `num_labels` outputs.
pub fn create_backend(
    config: &ModelConfig,
    files: &CheckpointFiles,
    num_labels: usize,
    seed: u64,
) -> TrainingResult<Box<dyn ModelBackend>> {
    match config.backend.as_str() {
        DISTILBERT => Ok(Box::new(DistilBertBackend::from_pretrained(
            &config.checkpoint,
            files,
            num_labels,
            config.device,
            seed,
        )?)),
        other => Err(TrainingError::Config(format!("unknown model backend: {other}"))),
    }
}

pub fn create_encoder(files: &CheckpointFiles, max_len: usize) -> TrainingResult<Arc<HfTokenizerEncoder>> {
    Ok(Arc::new(HfTokenizerEncoder::from_file(&files.tokenizer, max_len)?))
}

/// Load a saved artifact directory for inference.
pub fn load_classification_pipeline(dir: &Path) -> TrainingResult<TextClassificationPipeline> {
    let config = ArtifactConfig::load(dir)?;
    let labels = config.label_map()?;
    let encoder = HfTokenizerEncoder::from_saved(&dir.join(TOKENIZER_FILE))?;
    let max_len = encoder.max_len();

    let is_distilbert = config.architectures.iter().any(|a| a == ARCHITECTURE) || config.model_type == MODEL_TYPE;
    if !is_distilbert {
        return Err(TrainingError::Artifact(format!(
            "unsupported model: {:?} ({})",
            config.architectures, config.model_type
        )));
    }
    let spec = ModelSpec { backend: DISTILBERT.to_string(), checkpoint: config.name_or_path.clone() };
    let backend: Box<dyn ModelBackend> = Box::new(DistilBertBackend::load(dir, spec, labels.len())?);
    tracing::info!(dir = %dir.display(), model_type = %config.model_type, labels = labels.len(), "loaded classification pipeline");

    TextClassificationPipeline::new(backend, Arc::new(encoder), labels, max_len)
}
