//! Resolving a base checkpoint to local files.

use crate::error::{HubError, HubResult};
use crate::hub::HubEndpoints;
use hf_hub::api::tokio::{ApiBuilder, ApiError, ApiRepo};
use std::path::{Path, PathBuf};
use tweetsent_training::RegistryCredential;

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Paths of the files a backend is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl CheckpointFiles {
    /// Files of a checkpoint already on disk.
    pub fn from_dir(dir: &Path) -> HubResult<Self> {
        let files = Self {
            config: dir.join(CONFIG_FILE),
            tokenizer: dir.join(TOKENIZER_FILE),
            weights: dir.join(WEIGHTS_FILE),
        };
        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.is_file() {
                return Err(HubError::NotFound(format!("checkpoint file {}", path.display())));
            }
        }
        Ok(files)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckpointLoader {
    endpoints: HubEndpoints,
    credential: Option<RegistryCredential>,
    cache_dir: Option<PathBuf>,
}

impl CheckpointLoader {
    #[must_use]
    pub fn new(endpoints: HubEndpoints, credential: Option<RegistryCredential>) -> Self {
        Self { endpoints, credential, cache_dir: None }
    }

    /// Download into `dir` instead of the default hf-hub cache.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// A local directory is used as-is; anything else is a Hub model id
    /// downloaded into the hf-hub cache.
    pub async fn resolve(&self, checkpoint: &str) -> HubResult<CheckpointFiles> {
        let local = Path::new(checkpoint);
        if local.is_dir() {
            tracing::debug!(checkpoint, "using local checkpoint directory");
            return CheckpointFiles::from_dir(local);
        }
        if looks_like_path(checkpoint) {
            return Err(HubError::NotFound(format!("checkpoint directory {checkpoint}")));
        }

        let mut builder = ApiBuilder::new()
            .with_progress(false)
            .with_endpoint(self.endpoints.endpoint.clone())
            .with_token(self.credential.as_ref().map(|c| c.expose().to_string()));
        if let Some(dir) = &self.cache_dir {
            builder = builder.with_cache_dir(dir.clone());
        }
        let api = builder.build().map_err(|e| HubError::Download(e.to_string()))?;
        let repo = api.model(checkpoint.to_string());

        let files = CheckpointFiles {
            config: download(&repo, checkpoint, CONFIG_FILE).await?,
            tokenizer: download(&repo, checkpoint, TOKENIZER_FILE).await?,
            weights: download(&repo, checkpoint, WEIGHTS_FILE).await?,
        };
        tracing::info!(checkpoint, "checkpoint files resolved");
        Ok(files)
    }
}

/// Hub ids are `name` or `namespace/name`; anything else is meant as a path.
fn looks_like_path(checkpoint: &str) -> bool {
    checkpoint.starts_with(['.', '/', '~']) || checkpoint.matches('/').count() > 1 || checkpoint.contains('\\')
}

async fn download(repo: &ApiRepo, checkpoint: &str, file: &str) -> HubResult<PathBuf> {
    repo.get(file).await.map_err(|e| match e {
        // The Hub answers 401 for repos that do not exist when unauthenticated.
        ApiError::RequestError(ref err) if matches!(err.status().map(|s| s.as_u16()), Some(401 | 404)) => {
            HubError::NotFound(format!("{checkpoint}/{file}"))
        }
        other => HubError::Download(format!("{checkpoint}/{file}: {other}")),
    })
}
