//! Model trainer: hyperparameters, the fit/evaluate loop, save and publish.
//!
//! A run moves through
//! `Constructed -> Configured -> Training -> Completed | Failed`, and a
//! completed run that publishes ends in `Published | PublishFailed`. There
//! are no retries: any error ends the run.

use crate::artifacts::{
    ArtifactConfig, ArtifactKind, LogEntry, TrainingArtifact, TrainingManifest, TrainingMetrics, make_artifact,
    write_json,
};
use crate::backend::{ModelBackend, StepParams};
use crate::collator::{Batch, DataCollatorWithPadding};
use crate::config::{EvalMetric, IntervalStrategy, LabelMap, SentimentConfig};
use crate::dataset::DatasetId;
use crate::error::{TrainingError, TrainingResult};
use crate::job::RunId;
use crate::layout::OutputLayout;
use crate::metrics::{EvalPrediction, MetricMap, compute_metrics};
use crate::preparer::PreparedDataset;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::{ModelRegistry, PublishReceipt, PublishRequest};
use crate::tokenize::{TextEncoder, TokenizedDataset, TokenizedExample};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Constructed,
    Configured,
    Training,
    Completed,
    Failed(String),
    Published,
    PublishFailed(String),
}

/// Immutable hyperparameter bundle consumed by the training loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingArgs {
    pub output_dir: PathBuf,
    pub num_train_epochs: u32,
    pub learning_rate: f64,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub weight_decay: f64,
    pub eval_strategy: IntervalStrategy,
    pub save_strategy: IntervalStrategy,
    pub logging_strategy: IntervalStrategy,
    pub eval_metric: EvalMetric,
    pub push_to_hub: bool,
    pub hub_model_id: String,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Publishing disabled; the registry was never contacted.
    Skipped,
    Published(PublishReceipt),
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub manifest: TrainingManifest,
    pub publish: PublishOutcome,
}

/// Result of the fit/evaluate loop.
#[derive(Debug, Clone, Default)]
pub struct TrainOutput {
    pub global_step: u64,
    pub metrics: TrainingMetrics,
}

pub struct TextClassificationTrainer {
    config: SentimentConfig,
    labels: LabelMap,
    train: TokenizedDataset,
    test: TokenizedDataset,
    dataset_id: DatasetId,
    backend: Box<dyn ModelBackend>,
    encoder: Arc<dyn TextEncoder>,
    registry: Arc<dyn ModelRegistry>,
    progress: Arc<dyn ProgressSink>,
    collator: DataCollatorWithPadding,
    run_id: RunId,
    status: TrainerStatus,
}

impl TextClassificationTrainer {
    pub fn new(
        config: SentimentConfig,
        data: PreparedDataset,
        backend: Box<dyn ModelBackend>,
        encoder: Arc<dyn TextEncoder>,
        registry: Arc<dyn ModelRegistry>,
        progress: Arc<dyn ProgressSink>,
    ) -> TrainingResult<Self> {
        config.validate()?;
        let labels = config.model.label_map()?;
        if backend.num_labels() != labels.len() {
            return Err(TrainingError::Config(format!(
                "backend head has {} outputs but {} labels are configured",
                backend.num_labels(),
                labels.len()
            )));
        }
        if data.train.is_empty() || data.test.is_empty() {
            return Err(TrainingError::Dataset("train and test partitions must be non-empty".to_string()));
        }

        let collator = DataCollatorWithPadding::new(encoder.pad_token_id());
        let run_id = RunId::new();
        tracing::info!(
            %run_id,
            backend = backend.id(),
            device = %backend.device(),
            num_labels = labels.len(),
            "trainer constructed"
        );

        Ok(Self {
            config,
            labels,
            train: data.train,
            test: data.test,
            dataset_id: data.dataset_id,
            backend,
            encoder,
            registry,
            progress,
            collator,
            run_id,
            status: TrainerStatus::Constructed,
        })
    }

    #[must_use]
    pub fn status(&self) -> &TrainerStatus {
        &self.status
    }

    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Arg-max the logits and score them with the configured metric.
    pub fn compute_metrics(&self, prediction: &EvalPrediction) -> TrainingResult<MetricMap> {
        compute_metrics(self.config.training.eval_metric, prediction)
    }

    pub fn set_training_args(&mut self) -> TrainingArgs {
        let t = &self.config.training;
        let args = TrainingArgs {
            output_dir: t.output_dir.clone(),
            num_train_epochs: t.epochs,
            learning_rate: t.learning_rate,
            per_device_train_batch_size: t.batch_size as usize,
            per_device_eval_batch_size: t.eval_batch_size.unwrap_or(t.batch_size) as usize,
            weight_decay: t.weight_decay,
            eval_strategy: t.eval_strategy,
            save_strategy: t.save_strategy,
            logging_strategy: t.logging_strategy,
            eval_metric: t.eval_metric,
            push_to_hub: self.config.publish.push_to_hub,
            hub_model_id: self.config.hub_model_id(),
            seed: t.seed,
        };
        if self.status == TrainerStatus::Constructed {
            self.status = TrainerStatus::Configured;
        }
        args
    }

    /// Bind backend, hyperparameters, collator, datasets and metric into a run.
    pub fn model_trainer(&mut self) -> TrainerRun<'_> {
        let args = self.set_training_args();
        self.bind(args)
    }

    fn bind(&mut self, args: TrainingArgs) -> TrainerRun<'_> {
        TrainerRun {
            args,
            backend: self.backend.as_mut(),
            encoder: self.encoder.as_ref(),
            labels: &self.labels,
            collator: self.collator,
            train: &self.train,
            test: &self.test,
            progress: self.progress.as_ref(),
            run_id: &self.run_id,
        }
    }

    /// Train to completion, save the artifact, then publish if enabled.
    pub async fn train_and_save_and_push_to_hub(&mut self) -> TrainingResult<RunOutcome> {
        let args = self.set_training_args();
        self.status = TrainerStatus::Training;
        let trained = self.bind(args.clone()).train().await;

        let trained = match trained {
            Ok(trained) => trained,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "training failed");
                self.status = TrainerStatus::Failed(e.to_string());
                return Err(e);
            }
        };

        let manifest = match self.save_model(&args, trained).await {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "saving model failed");
                self.status = TrainerStatus::Failed(e.to_string());
                return Err(e);
            }
        };
        self.status = TrainerStatus::Completed;

        if !args.push_to_hub {
            tracing::info!(run_id = %self.run_id, "publishing disabled, skipping registry");
            return Ok(RunOutcome { manifest, publish: PublishOutcome::Skipped });
        }

        match self.push_to_hub(&args, &manifest).await {
            Ok(receipt) => {
                self.status = TrainerStatus::Published;
                self.progress.on_event(ProgressEvent::Published {
                    run_id: self.run_id.clone(),
                    repo_url: receipt.repo_url.clone(),
                });
                Ok(RunOutcome { manifest, publish: PublishOutcome::Published(receipt) })
            }
            Err(e) => {
                tracing::error!(
                    run_id = %self.run_id,
                    error = %e,
                    output_dir = %args.output_dir.display(),
                    "publish failed; local artifact retained"
                );
                self.status = TrainerStatus::PublishFailed(e.to_string());
                Err(match e {
                    TrainingError::Publish(_) => e,
                    other => TrainingError::Publish(other.to_string()),
                })
            }
        }
    }

    async fn save_model(&self, args: &TrainingArgs, trained: TrainOutput) -> TrainingResult<TrainingManifest> {
        let layout = OutputLayout::new(args.output_dir.clone());
        layout.ensure_root()?;

        let mut artifacts =
            save_artifact_files(self.backend.as_ref(), self.encoder.as_ref(), &self.labels, layout.root()).await?;

        let manifest = TrainingManifest {
            run_id: self.run_id.clone(),
            created_at: chrono::Utc::now(),
            base_model: self.backend.model_spec(),
            dataset_id: self.dataset_id.clone(),
            train_rows: self.train.len(),
            test_rows: self.test.len(),
            metrics: trained.metrics,
            artifacts: artifacts.clone(),
        };
        write_json(layout.manifest_path(), &manifest)?;
        artifacts.push(make_artifact(ArtifactKind::Manifest, layout.manifest_path())?);

        tracing::info!(output_dir = %layout.root().display(), files = artifacts.len(), "model saved");
        Ok(TrainingManifest { artifacts, ..manifest })
    }

    async fn push_to_hub(&self, args: &TrainingArgs, manifest: &TrainingManifest) -> TrainingResult<PublishReceipt> {
        let request = PublishRequest {
            repo_id: args.hub_model_id.clone(),
            revision: self.config.publish.revision.clone(),
            local_dir: args.output_dir.clone(),
            files: manifest.artifacts.iter().map(|a| a.relative_to(&args.output_dir)).collect(),
            commit_message: self.config.publish.commit_message.clone(),
            private: self.config.publish.private,
        };
        tracing::info!(registry = self.registry.id(), repo_id = %request.repo_id, files = request.files.len(), "publishing");
        self.registry.publish(&request).await
    }
}

/// Weights, tokenizer and config for a model directory.
async fn save_artifact_files(
    backend: &dyn ModelBackend,
    encoder: &dyn TextEncoder,
    labels: &LabelMap,
    dir: &Path,
) -> TrainingResult<Vec<TrainingArtifact>> {
    let mut artifacts = backend.save(dir).await?;
    artifacts.push(make_artifact(ArtifactKind::Tokenizer, encoder.save(dir)?)?);
    let config = ArtifactConfig::new(&backend.model_spec(), backend.config_json(), labels);
    artifacts.push(config.save(dir)?);
    Ok(artifacts)
}

/// Learning rate decayed linearly from `base` to zero over `total_steps`.
#[must_use]
pub fn linear_schedule(base: f64, step: u64, total_steps: u64) -> f64 {
    if total_steps == 0 {
        return base;
    }
    base * (1.0 - step.min(total_steps) as f64 / total_steps as f64)
}

/// A run-ready trainer borrowing the model and datasets.
pub struct TrainerRun<'a> {
    args: TrainingArgs,
    backend: &'a mut dyn ModelBackend,
    encoder: &'a dyn TextEncoder,
    labels: &'a LabelMap,
    collator: DataCollatorWithPadding,
    train: &'a [TokenizedExample],
    test: &'a [TokenizedExample],
    progress: &'a dyn ProgressSink,
    run_id: &'a RunId,
}

impl TrainerRun<'_> {
    #[must_use]
    pub fn args(&self) -> &TrainingArgs {
        &self.args
    }

    /// Run every epoch to completion; no early stopping.
    pub async fn train(self) -> TrainingResult<TrainOutput> {
        let args = self.args.clone();
        let eval_batches = self.collator.batches(self.test, args.per_device_eval_batch_size, None)?;
        let steps_per_epoch = self.train.len().div_ceil(args.per_device_train_batch_size) as u64;
        let total_steps = steps_per_epoch * u64::from(args.num_train_epochs);
        let mut rng = StdRng::seed_from_u64(args.seed);

        self.progress.on_event(ProgressEvent::Started {
            run_id: self.run_id.clone(),
            epochs: args.num_train_epochs,
            steps_per_epoch,
        });

        let mut out = TrainOutput::default();
        let mut total_loss = 0.0;
        let mut window_loss = 0.0;
        let mut window_steps = 0u64;
        let mut last_eval_step = None;

        for epoch in 1..=args.num_train_epochs {
            let batches = self.collator.batches(self.train, args.per_device_train_batch_size, Some(&mut rng))?;
            tracing::debug!(epoch, batches = batches.len(), "epoch started");

            for batch in &batches {
                let params = StepParams {
                    learning_rate: linear_schedule(args.learning_rate, out.global_step, total_steps),
                    weight_decay: args.weight_decay,
                };
                let loss = self.backend.fit(batch, &params).await?;
                if !loss.is_finite() {
                    return Err(TrainingError::Backend(format!(
                        "non-finite loss at step {}",
                        out.global_step + 1
                    )));
                }
                out.global_step += 1;
                total_loss += loss;
                window_loss += loss;
                window_steps += 1;

                if args.logging_strategy.fires_at_step(out.global_step) {
                    self.log(&mut out, epoch, window_loss / window_steps as f64);
                    window_loss = 0.0;
                    window_steps = 0;
                }
                if args.eval_strategy.fires_at_step(out.global_step) {
                    self.evaluate(&mut out, epoch, &eval_batches).await?;
                    last_eval_step = Some(out.global_step);
                }
                if args.save_strategy.fires_at_step(out.global_step) {
                    self.save_checkpoint(out.global_step).await?;
                }
            }

            if args.logging_strategy.fires_at_epoch_end() && window_steps > 0 {
                self.log(&mut out, epoch, window_loss / window_steps as f64);
                window_loss = 0.0;
                window_steps = 0;
            }
            if args.eval_strategy.fires_at_epoch_end() {
                self.evaluate(&mut out, epoch, &eval_batches).await?;
                last_eval_step = Some(out.global_step);
            }
            if args.save_strategy.fires_at_epoch_end() {
                self.save_checkpoint(out.global_step).await?;
            }
        }

        // The manifest always carries metrics for the final weights.
        if last_eval_step != Some(out.global_step) {
            self.evaluate(&mut out, args.num_train_epochs, &eval_batches).await?;
        }

        if out.global_step > 0 {
            out.metrics.train_loss = Some(total_loss / out.global_step as f64);
        }
        out.metrics.steps = Some(out.global_step);
        out.metrics.epochs = Some(args.num_train_epochs);
        self.progress.on_event(ProgressEvent::Finished { run_id: self.run_id.clone(), steps: out.global_step });
        Ok(out)
    }

    fn log(&self, out: &mut TrainOutput, epoch: u32, train_loss: f64) {
        out.metrics.log_history.push(LogEntry {
            epoch,
            step: out.global_step,
            train_loss: Some(train_loss),
            eval_loss: None,
            metrics: MetricMap::new(),
        });
        self.progress.on_event(ProgressEvent::Log {
            run_id: self.run_id.clone(),
            epoch,
            step: out.global_step,
            train_loss,
        });
    }

    async fn evaluate(&self, out: &mut TrainOutput, epoch: u32, batches: &[Batch]) -> TrainingResult<()> {
        let eval = self.backend.evaluate(batches).await?;
        let metrics = compute_metrics(self.args.eval_metric, &eval.prediction)?;

        out.metrics.eval_loss = Some(eval.loss);
        out.metrics.eval.clone_from(&metrics);
        out.metrics.log_history.push(LogEntry {
            epoch,
            step: out.global_step,
            train_loss: None,
            eval_loss: Some(eval.loss),
            metrics: metrics.clone(),
        });
        self.progress.on_event(ProgressEvent::Evaluated {
            run_id: self.run_id.clone(),
            epoch,
            step: out.global_step,
            eval_loss: eval.loss,
            metrics,
        });
        Ok(())
    }

    async fn save_checkpoint(&self, step: u64) -> TrainingResult<()> {
        let layout = OutputLayout::new(self.args.output_dir.clone());
        let dir = layout.ensure_checkpoint_dir(step)?;
        let artifacts = save_artifact_files(&*self.backend, self.encoder, self.labels, &dir).await?;
        tracing::debug!(step, files = artifacts.len(), "checkpoint written");
        self.progress.on_event(ProgressEvent::Checkpoint { run_id: self.run_id.clone(), step, path: dir });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::read_manifest;
    use crate::backend::testing::MajorityBackend;
    use crate::dataset::LabeledRecord;
    use crate::progress::TracingProgressSink;
    use crate::registry::testing::RecordingRegistry;
    use crate::tokenize::testing::WhitespaceEncoder;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct CollectingSink(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for CollectingSink {
        fn on_event(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn prepared() -> PreparedDataset {
        let encoder = WhitespaceEncoder { max_len: 8 };
        let rows = |n: usize, offset: usize| -> Vec<LabeledRecord> {
            (0..n)
                .map(|i| LabeledRecord { text: format!("tweet number {}", i + offset), label: ((i + offset) % 3) as u32 })
                .collect()
        };
        let encode = |records: Vec<LabeledRecord>| {
            let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
            let labels: Vec<u32> = records.iter().map(|r| r.label).collect();
            crate::tokenize::encode_labeled(&encoder, &texts, &labels, 8).unwrap()
        };
        PreparedDataset {
            train: encode(rows(12, 0)),
            test: encode(rows(3, 100)),
            dataset_id: DatasetId("toy".to_string()),
        }
    }

    fn config(dir: &TempDir, push: bool) -> SentimentConfig {
        let mut config = SentimentConfig::default();
        config.training.output_dir = dir.path().join("tweet-sentiment");
        config.training.epochs = 2;
        config.training.batch_size = 4;
        config.publish.push_to_hub = push;
        config
    }

    fn trainer(
        config: SentimentConfig,
        backend: MajorityBackend,
        registry: Arc<RecordingRegistry>,
    ) -> TextClassificationTrainer {
        TextClassificationTrainer::new(
            config,
            prepared(),
            Box::new(backend),
            Arc::new(WhitespaceEncoder { max_len: 8 }),
            registry,
            Arc::new(TracingProgressSink),
        )
        .unwrap()
    }

    #[test]
    fn test_set_training_args_reflects_config() {
        let temp = TempDir::new().unwrap();
        let mut t = trainer(config(&temp, true), MajorityBackend::new(3), Arc::default());
        assert_eq!(t.status(), &TrainerStatus::Constructed);

        let args = t.set_training_args();
        assert_eq!(args.num_train_epochs, 2);
        assert_eq!(args.per_device_train_batch_size, 4);
        assert_eq!(args.per_device_eval_batch_size, 4);
        assert_eq!(args.hub_model_id, "tweet-sentiment");
        assert!((args.weight_decay - 0.01).abs() < f64::EPSILON);
        assert_eq!(t.status(), &TrainerStatus::Configured);
    }

    #[test]
    fn test_linear_schedule_decays_to_zero() {
        assert!((linear_schedule(2e-5, 0, 6) - 2e-5).abs() < 1e-12);
        assert!((linear_schedule(2e-5, 3, 6) - 1e-5).abs() < 1e-12);
        assert!(linear_schedule(2e-5, 6, 6).abs() < 1e-12);
        assert!((linear_schedule(2e-5, 4, 0) - 2e-5).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_head_is_rejected() {
        let temp = TempDir::new().unwrap();
        let result = TextClassificationTrainer::new(
            config(&temp, false),
            prepared(),
            Box::new(MajorityBackend::new(2)),
            Arc::new(WhitespaceEncoder { max_len: 8 }),
            Arc::new(RecordingRegistry::default()),
            Arc::new(TracingProgressSink),
        );
        assert!(matches!(result, Err(TrainingError::Config(_))));
    }

    #[tokio::test]
    async fn test_model_trainer_runs_every_epoch() {
        let temp = TempDir::new().unwrap();
        let mut t = trainer(config(&temp, false), MajorityBackend::new(3), Arc::default());
        let out = t.model_trainer().train().await.unwrap();

        // 12 rows, batch 4, 2 epochs
        assert_eq!(out.global_step, 6);
        assert_eq!(out.metrics.epochs, Some(2));
        assert!(out.metrics.eval.contains_key("accuracy"));
        let evals = out.metrics.log_history.iter().filter(|e| e.eval_loss.is_some()).count();
        assert_eq!(evals, 2);
        assert!(temp.path().join("tweet-sentiment/checkpoint-3/model.safetensors").exists());
        assert!(temp.path().join("tweet-sentiment/checkpoint-6/config.json").exists());
    }

    #[tokio::test]
    async fn test_step_strategy_emits_progress_events() {
        let temp = TempDir::new().unwrap();
        let mut cfg = config(&temp, false);
        cfg.training.eval_strategy = IntervalStrategy::Steps(4);
        cfg.training.save_strategy = IntervalStrategy::No;
        cfg.training.logging_strategy = IntervalStrategy::Steps(2);
        let sink = Arc::new(CollectingSink::default());
        let mut t = TextClassificationTrainer::new(
            cfg,
            prepared(),
            Box::new(MajorityBackend::new(3)),
            Arc::new(WhitespaceEncoder { max_len: 8 }),
            Arc::new(RecordingRegistry::default()),
            sink.clone(),
        )
        .unwrap();
        t.model_trainer().train().await.unwrap();

        let events = sink.0.lock().unwrap();
        let logs = events.iter().filter(|e| matches!(e, ProgressEvent::Log { .. })).count();
        let evals: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Evaluated { step, .. } => Some(*step),
                _ => None,
            })
            .collect();
        assert_eq!(logs, 3);
        // step 4 plus the final evaluation at step 6
        assert_eq!(evals, vec![4, 6]);
        assert!(!events.iter().any(|e| matches!(e, ProgressEvent::Checkpoint { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { steps: 6, .. })));
    }

    #[tokio::test]
    async fn test_run_without_publish_never_contacts_registry() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(RecordingRegistry::default());
        let mut t = trainer(config(&temp, false), MajorityBackend::new(3), registry.clone());

        let outcome = t.train_and_save_and_push_to_hub().await.unwrap();
        assert_eq!(outcome.publish, PublishOutcome::Skipped);
        assert_eq!(registry.call_count(), 0);
        assert_eq!(t.status(), &TrainerStatus::Completed);

        let root = temp.path().join("tweet-sentiment");
        for file in ["model.safetensors", "tokenizer.json", "config.json", "training_manifest.json"] {
            assert!(root.join(file).exists(), "missing {file}");
        }
        let manifest = read_manifest(&root.join("training_manifest.json")).unwrap();
        assert_eq!(manifest.train_rows, 12);
        assert_eq!(manifest.test_rows, 3);
        assert_eq!(manifest.metrics.steps, Some(6));
    }

    #[tokio::test]
    async fn test_run_publishes_every_saved_file() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(RecordingRegistry::default());
        let mut t = trainer(config(&temp, true), MajorityBackend::new(3), registry.clone());

        let outcome = t.train_and_save_and_push_to_hub().await.unwrap();
        assert!(matches!(outcome.publish, PublishOutcome::Published(_)));
        assert_eq!(t.status(), &TrainerStatus::Published);

        let calls = registry.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].repo_id, "tweet-sentiment");
        assert_eq!(calls[0].commit_message, "End of training");
        assert!(calls[0].files.contains(&PathBuf::from("training_manifest.json")));
        assert!(calls[0].files.iter().all(|f| f.is_relative()));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_local_artifact() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(RecordingRegistry::failing());
        let mut t = trainer(config(&temp, true), MajorityBackend::new(3), registry.clone());

        let err = t.train_and_save_and_push_to_hub().await.unwrap_err();
        assert!(err.is_publish());
        assert!(matches!(t.status(), TrainerStatus::PublishFailed(_)));
        assert!(temp.path().join("tweet-sentiment/model.safetensors").exists());
    }

    #[tokio::test]
    async fn test_backend_failure_marks_run_failed() {
        let temp = TempDir::new().unwrap();
        let registry = Arc::new(RecordingRegistry::default());
        let mut backend = MajorityBackend::new(3);
        backend.fail_at_step = Some(2);
        let mut t = trainer(config(&temp, true), backend, registry.clone());

        let err = t.train_and_save_and_push_to_hub().await.unwrap_err();
        assert!(matches!(err, TrainingError::Backend(_)));
        assert!(matches!(t.status(), TrainerStatus::Failed(_)));
        assert_eq!(registry.call_count(), 0);
        assert!(!temp.path().join("tweet-sentiment/training_manifest.json").exists());
    }
}
