use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Filesystem layout of a training output directory.
///
/// ```text
/// <output_dir>/
///   model.safetensors, config.json, tokenizer.json
///   training_manifest.json
///   checkpoint-<step>/
/// ```
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("training_manifest.json")
    }

    #[must_use]
    pub fn checkpoint_dir(&self, step: u64) -> PathBuf {
        self.root.join(format!("checkpoint-{step}"))
    }

    pub fn ensure_root(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn ensure_checkpoint_dir(&self, step: u64) -> TrainingResult<PathBuf> {
        let dir = self.checkpoint_dir(step);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
