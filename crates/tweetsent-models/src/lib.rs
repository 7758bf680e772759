//! Concrete capabilities for the tweetsent pipeline.
//!
//! # Provided implementations
//!
//! - **Hub dataset source**: rows from the datasets-server `/rows` API
//! - **Hub registry**: repo creation and NDJSON commits, with Git LFS for large files
//! - **Checkpoints**: `config.json`, `tokenizer.json` and `model.safetensors` via `hf-hub`
//! - **Tokenizer**: Hugging Face `tokenizers` with fixed-length padding
//! - **DistilBERT backend**: full fine-tuning of a DistilBERT checkpoint with a
//!   classification head, on candle (CPU, CUDA or Metal)

pub mod checkpoint;
pub mod classifier;
pub mod dataset_source;
pub mod distilbert;
pub mod error;
pub mod factory;
pub mod hub;
pub mod registry;
pub mod tokenizer;

pub use checkpoint::{CheckpointFiles, CheckpointLoader};
pub use classifier::{DistilBertBackend, available_devices};
pub use dataset_source::HubDatasetSource;
pub use distilbert::{DistilBertConfig, DistilBertForSequenceClassification};
pub use error::{HubError, HubResult};
pub use factory::{create_backend, create_encoder, load_classification_pipeline};
pub use hub::{HubClient, HubEndpoints};
pub use registry::HubRegistry;
pub use tokenizer::HfTokenizerEncoder;
