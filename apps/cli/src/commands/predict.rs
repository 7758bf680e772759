//! Inference command.

use crate::commands::types::PredictArgs;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use tweetsent_models::load_classification_pipeline;

pub async fn execute(args: PredictArgs) -> Result<()> {
    let pipeline = load_classification_pipeline(&args.model_dir)
        .with_context(|| format!("Failed to load model from {}", args.model_dir.display()))?;
    let predictions = pipeline.classify_batch(&args.texts).await.context("Classification failed")?;

    if args.json {
        let out: Vec<_> = args
            .texts
            .iter()
            .zip(&predictions)
            .map(|(text, p)| json!({"text": text, "label": p.label, "score": p.score}))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for (text, prediction) in args.texts.iter().zip(&predictions) {
        println!("{:<9} {:.3}  {}", prediction.label.bold(), prediction.score, text.dimmed());
    }
    Ok(())
}
