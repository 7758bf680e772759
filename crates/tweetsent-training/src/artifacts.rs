use crate::config::LabelMap;
use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{ModelSpec, RunId};
use crate::metrics::MetricMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Weights,
    Tokenizer,
    Config,
    Manifest,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
}

impl TrainingArtifact {
    /// Path relative to `root`, for registry uploads.
    #[must_use]
    pub fn relative_to(&self, root: &Path) -> PathBuf {
        self.path.strip_prefix(root).map_or_else(|_| self.path.clone(), Path::to_path_buf)
    }
}

/// One entry of the training log history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub epoch: u32,
    pub step: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "MetricMap::is_empty")]
    pub metrics: MetricMap,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrainingMetrics {
    pub train_loss: Option<f64>,
    pub eval_loss: Option<f64>,
    pub steps: Option<u64>,
    pub epochs: Option<u32>,
    #[serde(default)]
    pub eval: MetricMap,
    #[serde(default)]
    pub log_history: Vec<LogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub base_model: ModelSpec,
    pub dataset_id: DatasetId,
    pub train_rows: usize,
    pub test_rows: usize,
    #[serde(default)]
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
}

/// `config.json` of a saved model in the Hugging Face layout: the model's
/// own hyperparameters plus the classification head's label maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(rename = "_name_or_path", default)]
    pub name_or_path: String,
    #[serde(default)]
    pub architectures: Vec<String>,
    pub model_type: String,
    pub id2label: BTreeMap<String, String>,
    pub label2id: BTreeMap<String, u32>,
    #[serde(flatten)]
    pub model: Map<String, Value>,
}

impl ArtifactConfig {
    pub const FILE_NAME: &'static str = "config.json";

    /// Keys owned by this struct; a backend's copy of them is ignored.
    const RESERVED: [&'static str; 6] =
        ["_name_or_path", "architectures", "model_type", "id2label", "label2id", "num_labels"];

    #[must_use]
    pub fn new(spec: &ModelSpec, mut model: Map<String, Value>, labels: &LabelMap) -> Self {
        let architectures = match model.get("architectures") {
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            _ => Vec::new(),
        };
        let model_type = model
            .get("model_type")
            .and_then(Value::as_str)
            .unwrap_or(spec.backend.as_str())
            .to_string();
        for key in Self::RESERVED {
            model.remove(key);
        }
        Self {
            name_or_path: spec.checkpoint.clone(),
            architectures,
            model_type,
            id2label: labels.id2label().iter().map(|(id, name)| (id.to_string(), name.clone())).collect(),
            label2id: labels.label2id().clone(),
            model,
        }
    }

    pub fn label_map(&self) -> TrainingResult<LabelMap> {
        let mut id2label = BTreeMap::new();
        for (key, name) in &self.id2label {
            let id = key
                .parse::<u32>()
                .map_err(|_| TrainingError::Artifact(format!("id2label key {key:?} is not a class id")))?;
            id2label.insert(id, name.clone());
        }
        LabelMap::from_maps(id2label, self.label2id.clone())
    }

    pub fn load(dir: &Path) -> TrainingResult<Self> {
        let path = dir.join(Self::FILE_NAME);
        let bytes = std::fs::read(&path)
            .map_err(|e| TrainingError::Artifact(format!("failed to read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, dir: &Path) -> TrainingResult<TrainingArtifact> {
        let path = dir.join(Self::FILE_NAME);
        write_json(&path, self)?;
        make_artifact(ArtifactKind::Config, path)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<TrainingArtifact> {
    if !path.exists() {
        return Err(TrainingError::Artifact(format!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let hash = sha256_file(&path)?;
    Ok(TrainingArtifact { kind, path, sha256: hash })
}

pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> TrainingResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> TrainingResult<TrainingManifest> {
    let bytes = std::fs::read(path)
        .map_err(|e| TrainingError::Artifact(format!("failed to read manifest {}: {}", path.display(), e)))?;
    Ok(serde_json::from_slice::<TrainingManifest>(&bytes)?)
}
