//! Dataset preparation command.

use crate::commands::setup;
use crate::commands::types::PrepareArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use tweetsent_models::create_encoder;
use tweetsent_training::{DatasetPreparer, TokenizedExample};

fn label_counts(examples: &[TokenizedExample], num_labels: usize) -> Vec<usize> {
    let mut counts = vec![0; num_labels];
    for example in examples {
        if let Some(count) = counts.get_mut(example.label as usize) {
            *count += 1;
        }
    }
    counts
}

pub async fn execute(args: PrepareArgs) -> Result<()> {
    let config = setup::resolve_config(&args.config)?;
    let credential = setup::credential(&config);
    let files = setup::checkpoint(&config, credential.clone()).await?;
    let encoder = create_encoder(&files, config.model.max_len).context("Failed to load tokenizer")?;

    let source = setup::dataset_source(&args.config, credential);
    let preparer = DatasetPreparer::new(&config, source, encoder)?;
    let prepared = preparer.gen_classification_dataset().await.context("Failed to prepare dataset")?;

    let labels = config.model.label_map()?;
    let train_counts = label_counts(&prepared.train, labels.len());
    let test_counts = label_counts(&prepared.test, labels.len());

    if args.json {
        let classes: Vec<_> = labels
            .labels()
            .zip(train_counts.iter().zip(&test_counts))
            .map(|(name, (train, test))| json!({"label": name, "train": train, "test": test}))
            .collect();
        let out = json!({
            "dataset_id": prepared.dataset_id.0,
            "train_rows": prepared.train.len(),
            "test_rows": prepared.test.len(),
            "max_len": config.model.max_len,
            "classes": classes,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Dataset prepared".bold().cyan());
    println!("  Dataset: {}", prepared.dataset_id.0.dimmed());
    println!("  Rows: {} train / {} test", prepared.train.len(), prepared.test.len());
    println!();
    println!("  {:<12} {:>8} {:>8}", "Label", "Train", "Test");
    println!("  {}", "─".repeat(30));
    for (name, (train, test)) in labels.labels().zip(train_counts.iter().zip(&test_counts)) {
        println!("  {:<12} {:>8} {:>8}", name, train, test);
    }
    println!();
    Ok(())
}
