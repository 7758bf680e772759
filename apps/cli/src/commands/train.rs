//! Training command implementation.

use crate::commands::setup;
use crate::commands::types::TrainArgs;
use anyhow::{Context, Result, bail};
use colored::Colorize;
use std::sync::Arc;
use tweetsent_models::{HubClient, HubEndpoints, HubRegistry, create_backend, create_encoder};
use tweetsent_training::{
    DatasetPreparer, ModelRegistry, ProgressSink, PublishOutcome, StdoutProgressSink, TextClassificationTrainer,
    TracingProgressSink,
};

pub async fn execute(args: TrainArgs) -> Result<()> {
    let mut config = setup::resolve_config(&args.config)?;
    if args.no_push {
        config.publish.push_to_hub = false;
    }

    let credential = setup::credential(&config);
    // Fail before hours of training rather than at publish time.
    if config.publish.push_to_hub && credential.is_none() {
        bail!(
            "Publishing is enabled but ${} is not set. Export a registry token or pass --no-push.",
            config.publish.token_env
        );
    }

    let files = setup::checkpoint(&config, credential.clone()).await?;
    let encoder = create_encoder(&files, config.model.max_len).context("Failed to load tokenizer")?;

    let source = setup::dataset_source(&args.config, credential.clone());
    let preparer = DatasetPreparer::new(&config, source, encoder.clone())?;
    let prepared = preparer.gen_classification_dataset().await.context("Failed to prepare dataset")?;

    let labels = config.model.label_map()?;
    let backend = create_backend(&config.model, &files, labels.len(), config.training.seed)?;
    let registry: Arc<dyn ModelRegistry> =
        Arc::new(HubRegistry::new(HubClient::new(HubEndpoints::from_env(), credential)));
    let progress: Arc<dyn ProgressSink> =
        if args.json { Arc::new(TracingProgressSink) } else { Arc::new(StdoutProgressSink) };

    let mut trainer = TextClassificationTrainer::new(config, prepared, backend, encoder, registry, progress)?;
    let outcome = match trainer.train_and_save_and_push_to_hub().await {
        Ok(outcome) => outcome,
        Err(e) if e.is_publish() => {
            return Err(anyhow::Error::new(e)
                .context(format!("Training succeeded but publishing failed (run {})", trainer.run_id())));
        }
        Err(e) => return Err(anyhow::Error::new(e).context("Training failed")),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome.manifest)?);
        return Ok(());
    }

    let manifest = &outcome.manifest;
    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Run: {}", manifest.run_id.to_string().cyan());
    println!("  Rows: {} train / {} test", manifest.train_rows, manifest.test_rows);
    for (name, value) in &manifest.metrics.eval {
        println!("  {name}: {value:.4}");
    }
    if let Some(artifact) = manifest.artifacts.first() {
        let dir = artifact.path.parent().map(|p| p.display().to_string()).unwrap_or_default();
        println!("  Saved: {}", dir.dimmed());
    }
    match outcome.publish {
        PublishOutcome::Published(receipt) => println!("  Published: {}", receipt.repo_url.cyan()),
        PublishOutcome::Skipped => println!("  {}", "Publishing skipped".dimmed()),
    }
    println!();
    Ok(())
}
