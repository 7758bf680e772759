//! Shared wiring: configuration, credentials, sources and checkpoints.

use crate::commands::types::ConfigArgs;
use anyhow::{Context, Result};
use std::sync::Arc;
use tweetsent_models::{CheckpointFiles, CheckpointLoader, HubClient, HubDatasetSource, HubEndpoints};
use tweetsent_training::{DatasetSource, JsonlSource, RegistryCredential, SentimentConfig};

/// Load the config file (explicit, discovered or default) and apply flag overrides.
pub fn resolve_config(args: &ConfigArgs) -> Result<SentimentConfig> {
    let mut config =
        SentimentConfig::discover_and_load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(output_dir) = &args.output_dir {
        config.training.output_dir.clone_from(output_dir);
    }
    if let Some(sample_size) = args.sample_size {
        config.dataset.sample_size = Some(sample_size);
    }
    if args.no_sample {
        config.dataset.sample_size = None;
    }
    if let Some(epochs) = args.epochs {
        config.training.epochs = epochs;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub fn credential(config: &SentimentConfig) -> Option<RegistryCredential> {
    RegistryCredential::from_env(&config.publish.token_env)
}

pub fn dataset_source(args: &ConfigArgs, credential: Option<RegistryCredential>) -> Arc<dyn DatasetSource> {
    match &args.data_file {
        Some(path) => Arc::new(JsonlSource::new(path.clone())),
        None => Arc::new(HubDatasetSource::new(HubClient::new(HubEndpoints::from_env(), credential))),
    }
}

pub async fn checkpoint(config: &SentimentConfig, credential: Option<RegistryCredential>) -> Result<CheckpointFiles> {
    CheckpointLoader::new(HubEndpoints::from_env(), credential)
        .resolve(&config.model.checkpoint)
        .await
        .with_context(|| format!("Failed to resolve checkpoint {}", config.model.checkpoint))
}
