//! Tweetsent Training
//!
//! Backend-agnostic pieces of the tweet sentiment fine-tuning pipeline:
//! - Configuration and label maps (`SentimentConfig`, `LabelMap`)
//! - Dataset preparation: sampling, stratified split, tokenization (`DatasetPreparer`)
//! - The training loop, artifact layout and manifests (`TextClassificationTrainer`)
//! - Seams for model backends, dataset sources and registries
//! - Inference over a saved artifact (`TextClassificationPipeline`)

pub mod artifacts;
pub mod backend;
pub mod collator;
pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod preparer;
pub mod progress;
pub mod registry;
pub mod source;
pub mod split;
pub mod tokenize;
pub mod trainer;

pub use artifacts::{ArtifactConfig, ArtifactKind, TrainingArtifact, TrainingManifest, TrainingMetrics};
pub use backend::{EvalOutput, ModelBackend, StepParams};
pub use collator::{Batch, DataCollatorWithPadding};
pub use config::{
    DEFAULT_CONFIG_FILE, DatasetConfig, EvalMetric, IntervalStrategy, LabelMap, LabelRemap, ModelConfig, PublishConfig,
    SentimentConfig, TrainingConfig,
};
pub use dataset::{DatasetId, LabeledRecord, RawRow, SplitRecords};
pub use error::{TrainingError, TrainingResult};
pub use inference::{Prediction, TextClassificationPipeline};
pub use job::{ComputeDevice, ModelSpec, RunId};
pub use layout::OutputLayout;
pub use metrics::{EvalPrediction, MetricMap, compute_metrics};
pub use preparer::{DatasetPreparer, PreparedDataset};
pub use progress::{ProgressEvent, ProgressSink, StdoutProgressSink, TracingProgressSink};
pub use registry::{ModelRegistry, PublishReceipt, PublishRequest, RegistryCredential};
pub use source::{DatasetRequest, DatasetSource, InMemorySource, JsonlSource};
pub use split::stratified_split;
pub use tokenize::{Encoding, TextEncoder, TokenizedDataset, TokenizedExample};
pub use trainer::{PublishOutcome, RunOutcome, TextClassificationTrainer, TrainOutput, TrainerStatus, TrainingArgs};
