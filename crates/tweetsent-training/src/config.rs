//! Run configuration.
//!
//! Every component receives the pieces of [`SentimentConfig`] it needs through
//! its constructor. Configuration is loaded from TOML, falling back to the
//! defaults below when no file is present. Secrets never live here: the
//! registry token is read from the environment variable named by
//! [`PublishConfig::token_env`].

use crate::error::{TrainingError, TrainingResult};
use crate::job::ComputeDevice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tweetsent.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentConfig {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Dataset identifier on the registry (or a label for local files).
    pub dataset_id: String,
    /// Dataset configuration (subset) name.
    pub dataset_config: String,
    pub split: String,
    pub src_column: String,
    pub tgt_column: String,
    /// Fraction of the sample held out for evaluation, in (0, 1).
    pub test_size: f64,
    pub seed: u64,
    /// Rows drawn from the fetched dataset before splitting. `None` keeps all rows.
    pub sample_size: Option<usize>,
    /// Upper bound on rows fetched from a remote source.
    pub max_rows: Option<usize>,
    pub label_remap: Vec<LabelRemap>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            dataset_id: "emad12/stock_tweets_sentiment".to_string(),
            dataset_config: "default".to_string(),
            split: "train".to_string(),
            src_column: "tweet".to_string(),
            tgt_column: "sentiment".to_string(),
            test_size: 0.2,
            seed: 0,
            sample_size: Some(20_000),
            max_rows: None,
            label_remap: vec![LabelRemap { from: -1, to: 2 }],
        }
    }
}

/// Rewrites a source label value before it is checked against the label map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRemap {
    pub from: i64,
    pub to: i64,
}

/// Apply the first matching rule; labels without a rule pass through unchanged.
#[must_use]
pub fn remap_label(label: i64, rules: &[LabelRemap]) -> i64 {
    rules.iter().find(|r| r.from == label).map_or(label, |r| r.to)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base checkpoint on the registry.
    pub checkpoint: String,
    /// Backend identifier recorded in the artifact.
    pub backend: String,
    pub max_len: usize,
    pub device: ComputeDevice,
    /// Label names in id order: the id of a label is its position.
    pub labels: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            checkpoint: "distilbert-base-uncased".to_string(),
            backend: "distilbert".to_string(),
            max_len: 32,
            device: ComputeDevice::Auto,
            labels: vec!["NEUTRAL".to_string(), "POSITIVE".to_string(), "NEGATIVE".to_string()],
        }
    }
}

impl ModelConfig {
    pub fn label_map(&self) -> TrainingResult<LabelMap> {
        LabelMap::from_names(&self.labels)
    }
}

/// When a periodic action (evaluate, save, log) fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalStrategy {
    No,
    #[default]
    Epoch,
    /// Every N optimizer steps.
    Steps(u64),
}

impl IntervalStrategy {
    #[must_use]
    pub fn fires_at_epoch_end(self) -> bool {
        self == Self::Epoch
    }

    #[must_use]
    pub fn fires_at_step(self, global_step: u64) -> bool {
        match self {
            Self::Steps(every) => every > 0 && global_step > 0 && global_step % every == 0,
            Self::No | Self::Epoch => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMetric {
    #[default]
    Accuracy,
}

impl EvalMetric {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub output_dir: PathBuf,
    pub epochs: u32,
    pub learning_rate: f64,
    pub batch_size: u32,
    /// Evaluation batch size; defaults to `batch_size`.
    pub eval_batch_size: Option<u32>,
    pub weight_decay: f64,
    pub eval_strategy: IntervalStrategy,
    pub save_strategy: IntervalStrategy,
    pub logging_strategy: IntervalStrategy,
    pub eval_metric: EvalMetric,
    /// Seed for head initialisation and per-epoch shuffling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("distilbert-stock-tweet-sentiment-analysis"),
            epochs: 3,
            learning_rate: 2e-5,
            batch_size: 16,
            eval_batch_size: None,
            weight_decay: 0.01,
            eval_strategy: IntervalStrategy::Epoch,
            save_strategy: IntervalStrategy::Epoch,
            logging_strategy: IntervalStrategy::Epoch,
            eval_metric: EvalMetric::Accuracy,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub push_to_hub: bool,
    /// Target repository; defaults to the output directory name.
    pub hub_model_id: Option<String>,
    pub private: bool,
    /// Environment variable holding the registry token.
    pub token_env: String,
    pub commit_message: String,
    pub revision: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            push_to_hub: true,
            hub_model_id: None,
            private: false,
            token_env: "HF_TOKEN".to_string(),
            commit_message: "End of training".to_string(),
            revision: "main".to_string(),
        }
    }
}

impl SentimentConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrainingError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TrainingError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit file, else `./tweetsent.toml` if present, else defaults.
    pub fn discover_and_load(explicit: Option<&Path>) -> TrainingResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.exists() {
            tracing::debug!(path = %local.display(), "loading local config");
            return Self::load_from_file(&local);
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> TrainingResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TrainingError::Config(format!("failed to serialize config: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> TrainingResult<()> {
        let d = &self.dataset;
        if d.dataset_id.trim().is_empty() {
            return Err(TrainingError::Config("dataset.dataset_id is required".to_string()));
        }
        if d.src_column.trim().is_empty() || d.tgt_column.trim().is_empty() {
            return Err(TrainingError::Config("dataset columns must be named".to_string()));
        }
        if d.src_column == d.tgt_column {
            return Err(TrainingError::Config("dataset.src_column and dataset.tgt_column must differ".to_string()));
        }
        if !(d.test_size > 0.0 && d.test_size < 1.0) {
            return Err(TrainingError::Config(format!("dataset.test_size must be in (0, 1), got {}", d.test_size)));
        }
        if d.sample_size == Some(0) {
            return Err(TrainingError::Config("dataset.sample_size must be >= 1".to_string()));
        }
        for rule in &d.label_remap {
            if d.label_remap.iter().any(|other| other.from == rule.to && other.from != rule.from) {
                return Err(TrainingError::Config(format!(
                    "label_remap target {} is itself remapped",
                    rule.to
                )));
            }
        }

        let m = &self.model;
        if m.checkpoint.trim().is_empty() {
            return Err(TrainingError::Config("model.checkpoint is required".to_string()));
        }
        if m.max_len == 0 {
            return Err(TrainingError::Config("model.max_len must be >= 1".to_string()));
        }
        m.label_map()?;

        let t = &self.training;
        if t.epochs == 0 {
            return Err(TrainingError::Config("training.epochs must be >= 1".to_string()));
        }
        if !t.learning_rate.is_finite() || t.learning_rate <= 0.0 {
            return Err(TrainingError::Config("training.learning_rate must be > 0".to_string()));
        }
        if t.batch_size == 0 || t.eval_batch_size == Some(0) {
            return Err(TrainingError::Config("training batch sizes must be >= 1".to_string()));
        }
        if !t.weight_decay.is_finite() || t.weight_decay < 0.0 {
            return Err(TrainingError::Config("training.weight_decay must be >= 0".to_string()));
        }
        for (name, strategy) in [
            ("eval_strategy", t.eval_strategy),
            ("save_strategy", t.save_strategy),
            ("logging_strategy", t.logging_strategy),
        ] {
            if strategy == IntervalStrategy::Steps(0) {
                return Err(TrainingError::Config(format!("training.{name} steps must be >= 1")));
            }
        }

        if self.publish.push_to_hub && self.hub_model_id().trim().is_empty() {
            return Err(TrainingError::Config("publish.hub_model_id could not be derived".to_string()));
        }
        Ok(())
    }

    /// Target repository for publishing.
    #[must_use]
    pub fn hub_model_id(&self) -> String {
        self.publish.hub_model_id.clone().unwrap_or_else(|| {
            self.training
                .output_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
    }
}

/// Bidirectional mapping between class ids and label names.
///
/// Serialized the way registry model configs carry it (`id2label` / `label2id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    id2label: BTreeMap<u32, String>,
    label2id: BTreeMap<String, u32>,
}

impl LabelMap {
    /// Build from names in id order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> TrainingResult<Self> {
        let mut id2label = BTreeMap::new();
        let mut label2id = BTreeMap::new();
        for (id, name) in names.iter().enumerate() {
            let name = name.as_ref().trim();
            if name.is_empty() {
                return Err(TrainingError::Config(format!("label {id} has an empty name")));
            }
            if label2id.insert(name.to_string(), id as u32).is_some() {
                return Err(TrainingError::Config(format!("duplicate label name: {name}")));
            }
            id2label.insert(id as u32, name.to_string());
        }
        let map = Self { id2label, label2id };
        map.validate()?;
        Ok(map)
    }

    pub fn from_maps(id2label: BTreeMap<u32, String>, label2id: BTreeMap<String, u32>) -> TrainingResult<Self> {
        let map = Self { id2label, label2id };
        map.validate()?;
        Ok(map)
    }

    /// Check that both directions are exact inverses over ids `0..n`.
    pub fn validate(&self) -> TrainingResult<()> {
        if self.id2label.is_empty() {
            return Err(TrainingError::Config("label map must not be empty".to_string()));
        }
        if self.id2label.len() != self.label2id.len() {
            return Err(TrainingError::Config(format!(
                "id2label has {} entries but label2id has {}",
                self.id2label.len(),
                self.label2id.len()
            )));
        }
        for (expected, (id, label)) in self.id2label.iter().enumerate() {
            if *id != expected as u32 {
                return Err(TrainingError::Config(format!("label ids must be contiguous from 0, found {id}")));
            }
            if self.label2id.get(label) != Some(id) {
                return Err(TrainingError::Config(format!("label2id does not invert id2label for {label}")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.id2label.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id2label.is_empty()
    }

    #[must_use]
    pub fn label(&self, id: u32) -> Option<&str> {
        self.id2label.get(&id).map(String::as_str)
    }

    #[must_use]
    pub fn id(&self, label: &str) -> Option<u32> {
        self.label2id.get(label).copied()
    }

    #[must_use]
    pub fn contains_id(&self, id: u32) -> bool {
        self.id2label.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.id2label.keys().copied()
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.id2label.values().map(String::as_str)
    }

    #[must_use]
    pub fn id2label(&self) -> &BTreeMap<u32, String> {
        &self.id2label
    }

    #[must_use]
    pub fn label2id(&self) -> &BTreeMap<String, u32> {
        &self.label2id
    }
}
