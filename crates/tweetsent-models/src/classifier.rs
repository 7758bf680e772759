//! Full fine-tuning of a DistilBERT checkpoint for sequence classification.
//!
//! Every encoder weight and the fresh classification head are trainable
//! `Var`s in one `VarMap`. Steps use candle's AdamW, with biases and
//! LayerNorm parameters excluded from weight decay.

use crate::checkpoint::{CONFIG_FILE, CheckpointFiles, WEIGHTS_FILE};
use crate::distilbert::{ARCHITECTURE, DistilBertConfig, DistilBertForSequenceClassification, MODEL_TYPE};
use crate::error::{HubError, HubResult};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tweetsent_training::artifacts::{ArtifactKind, make_artifact};
use tweetsent_training::{
    Batch, ComputeDevice, ModelBackend, ModelSpec, StepParams, TrainingArtifact, TrainingError, TrainingResult,
};

pub const BACKEND_ID: &str = "distilbert";

const ENCODER_PREFIX: &str = "distilbert.";

/// Devices this build of candle can run on.
#[must_use]
pub fn available_devices() -> Vec<ComputeDevice> {
    let mut devices = vec![ComputeDevice::Cpu];
    if candle_core::utils::cuda_is_available() {
        devices.push(ComputeDevice::Cuda);
    }
    if candle_core::utils::metal_is_available() {
        devices.push(ComputeDevice::Metal);
    }
    devices
}

fn candle_device(device: ComputeDevice) -> HubResult<Device> {
    Ok(match device {
        ComputeDevice::Cuda => Device::new_cuda(0)?,
        ComputeDevice::Metal => Device::new_metal(0)?,
        ComputeDevice::Auto | ComputeDevice::Cpu => Device::Cpu,
    })
}

/// Separate optimizers so decay applies to weight matrices only.
struct Optimizers {
    decay: AdamW,
    no_decay: AdamW,
}

impl Optimizers {
    fn new(varmap: &VarMap) -> HubResult<Self> {
        let (no_decay, decay): (Vec<(String, Var)>, Vec<(String, Var)>) =
            lock_vars(varmap)?.iter().map(|(n, v)| (n.clone(), v.clone())).partition(|(n, _)| skips_decay(n));
        let vars = |named: Vec<(String, Var)>| named.into_iter().map(|(_, v)| v).collect::<Vec<_>>();
        Ok(Self {
            decay: AdamW::new(vars(decay), ParamsAdamW::default())?,
            no_decay: AdamW::new(vars(no_decay), ParamsAdamW { weight_decay: 0.0, ..ParamsAdamW::default() })?,
        })
    }

    fn step(&mut self, loss: &Tensor, params: &StepParams) -> HubResult<()> {
        let grads = loss.backward()?;
        self.decay.set_params(ParamsAdamW {
            lr: params.learning_rate,
            weight_decay: params.weight_decay,
            ..ParamsAdamW::default()
        });
        self.no_decay.set_learning_rate(params.learning_rate);
        self.decay.step(&grads)?;
        self.no_decay.step(&grads)?;
        Ok(())
    }
}

fn is_layer_norm(name: &str) -> bool {
    name.contains("layer_norm") || name.contains("LayerNorm")
}

fn skips_decay(name: &str) -> bool {
    name.ends_with(".bias") || is_layer_norm(name)
}

fn lock_vars(varmap: &VarMap) -> HubResult<std::sync::MutexGuard<'_, HashMap<String, Var>>> {
    varmap.data().lock().map_err(|_| HubError::Weights("variable map lock poisoned".to_string()))
}

pub struct DistilBertBackend {
    spec: ModelSpec,
    device: ComputeDevice,
    tensor_device: Device,
    config: DistilBertConfig,
    /// `config.json` of the base checkpoint, carried into saved artifacts.
    config_json: Map<String, Value>,
    num_labels: usize,
    varmap: VarMap,
    model: DistilBertForSequenceClassification,
    optimizers: Optimizers,
}

impl DistilBertBackend {
    /// Pretrained encoder from `files` plus a freshly initialized head.
    pub fn from_pretrained(
        checkpoint: &str,
        files: &CheckpointFiles,
        num_labels: usize,
        device: ComputeDevice,
        seed: u64,
    ) -> HubResult<Self> {
        let config_json = read_config(&files.config)?;
        let device = device.resolve(&available_devices());
        let spec = ModelSpec { backend: BACKEND_ID.to_string(), checkpoint: checkpoint.to_string() };
        let backend = Self::build(spec, config_json, num_labels, device)?;

        let base = candle_core::safetensors::load(&files.weights, &Device::Cpu)?;
        backend.init_from(&base, seed)?;
        tracing::info!(
            checkpoint,
            layers = backend.config.n_layers,
            dim = backend.config.dim,
            num_labels,
            %device,
            "distilbert backend initialized"
        );
        Ok(backend)
    }

    /// Reload a fine-tuned model from an artifact directory.
    pub fn load(dir: &Path, spec: ModelSpec, num_labels: usize) -> HubResult<Self> {
        let config_json = read_config(&dir.join(CONFIG_FILE))?;
        let mut backend = Self::build(spec, config_json, num_labels, ComputeDevice::Cpu)?;
        backend.varmap.load(dir.join(WEIGHTS_FILE))?;
        Ok(backend)
    }

    fn build(
        spec: ModelSpec,
        config_json: Map<String, Value>,
        num_labels: usize,
        device: ComputeDevice,
    ) -> HubResult<Self> {
        if num_labels == 0 {
            return Err(HubError::Weights("num_labels must be >= 1".to_string()));
        }
        let config: DistilBertConfig = serde_json::from_value(Value::Object(config_json.clone()))?;
        config.validate().map_err(HubError::Weights)?;

        let tensor_device = candle_device(device)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &tensor_device);
        let model = DistilBertForSequenceClassification::load(vb, &config, num_labels)?;
        let optimizers = Optimizers::new(&varmap)?;
        Ok(Self { spec, device, tensor_device, config, config_json, num_labels, varmap, model, optimizers })
    }

    /// Copy matching base tensors into the vars; everything else gets a
    /// seeded initialization so runs are reproducible.
    fn init_from(&self, base: &HashMap<String, Tensor>, seed: u64) -> HubResult<()> {
        let vars = lock_vars(&self.varmap)?;
        let mut names: Vec<&String> = vars.keys().collect();
        names.sort();

        let mut rng = StdRng::seed_from_u64(seed);
        let bound = self.config.initializer_range * 3f64.sqrt();
        let mut loaded = 0usize;
        let mut fresh = Vec::new();
        for name in names {
            let var = &vars[name];
            let pretrained =
                base.get(name.as_str()).or_else(|| name.strip_prefix(ENCODER_PREFIX).and_then(|n| base.get(n)));
            if let Some(tensor) = pretrained {
                if tensor.dims() != var.dims() {
                    return Err(HubError::Weights(format!(
                        "{name} has shape {:?} in the checkpoint, expected {:?}",
                        tensor.dims(),
                        var.dims()
                    )));
                }
                var.set(&tensor.to_dtype(DType::F32)?.to_device(&self.tensor_device)?)?;
                loaded += 1;
                continue;
            }
            // LayerNorm parameters keep their constant ones and zeros.
            if name.ends_with(".bias") && !is_layer_norm(name) {
                var.set(&var.zeros_like()?)?;
            } else if !is_layer_norm(name) {
                let values: Vec<f32> =
                    (0..var.elem_count()).map(|_| rng.random_range(-bound..=bound) as f32).collect();
                var.set(&Tensor::from_vec(values, var.dims(), &self.tensor_device)?)?;
            }
            fresh.push(name.clone());
        }

        if loaded == 0 {
            return Err(HubError::Weights(format!("no {MODEL_TYPE} weights found in the checkpoint")));
        }
        let missing_encoder: Vec<&String> = fresh.iter().filter(|n| n.starts_with(ENCODER_PREFIX)).collect();
        if !missing_encoder.is_empty() {
            tracing::warn!(?missing_encoder, "encoder weights missing from checkpoint, newly initialized");
        }
        tracing::debug!(loaded, ?fresh, "weights initialized");
        Ok(())
    }

    fn inputs(&self, batch: &Batch) -> HubResult<(Tensor, Tensor)> {
        let rows = batch.input_ids.len();
        let flat = |rows: &[Vec<u32>]| rows.iter().flatten().copied().collect::<Vec<u32>>();
        let ids = Tensor::from_vec(flat(&batch.input_ids), (rows, batch.seq_len), &self.tensor_device)?;
        let mask = Tensor::from_vec(flat(&batch.attention_mask), (rows, batch.seq_len), &self.tensor_device)?;
        Ok((ids, mask))
    }

    fn check_batch(&self, batch: &Batch) -> TrainingResult<()> {
        if batch.is_empty() {
            return Err(TrainingError::Backend("empty batch".to_string()));
        }
        if batch.seq_len > self.config.max_position_embeddings {
            return Err(TrainingError::Backend(format!(
                "sequence length {} exceeds max_position_embeddings {}",
                batch.seq_len, self.config.max_position_embeddings
            )));
        }
        if let Some(id) = batch.input_ids.iter().flatten().find(|&&id| id as usize >= self.config.vocab_size) {
            return Err(TrainingError::Backend(format!(
                "token id {id} outside vocabulary of {}",
                self.config.vocab_size
            )));
        }
        if batch.labels.iter().any(|&l| l as usize >= self.num_labels) {
            return Err(TrainingError::Backend(format!("label outside 0..{}", self.num_labels)));
        }
        Ok(())
    }

    fn train_step(&mut self, batch: &Batch, params: &StepParams) -> HubResult<f64> {
        let (ids, mask) = self.inputs(batch)?;
        let labels = Tensor::from_vec(batch.labels.clone(), batch.len(), &self.tensor_device)?;
        let logits = self.model.forward(&ids, &mask)?;
        let loss = candle_nn::loss::cross_entropy(&logits, &labels)?;
        self.optimizers.step(&loss, params)?;
        Ok(f64::from(loss.to_scalar::<f32>()?))
    }

    fn logits(&self, batch: &Batch) -> HubResult<Vec<Vec<f32>>> {
        let (ids, mask) = self.inputs(batch)?;
        Ok(self.model.forward(&ids, &mask)?.detach().to_vec2::<f32>()?)
    }
}

fn read_config(path: &Path) -> HubResult<Map<String, Value>> {
    let bytes = std::fs::read(path)?;
    match serde_json::from_slice(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(HubError::Weights(format!("{} is not a JSON object", path.display()))),
    }
}

#[async_trait]
impl ModelBackend for DistilBertBackend {
    fn id(&self) -> &'static str {
        BACKEND_ID
    }

    fn model_spec(&self) -> ModelSpec {
        self.spec.clone()
    }

    fn num_labels(&self) -> usize {
        self.num_labels
    }

    fn device(&self) -> ComputeDevice {
        self.device
    }

    fn config_json(&self) -> Map<String, Value> {
        let mut config = self.config_json.clone();
        config.insert("architectures".to_string(), Value::from(vec![ARCHITECTURE]));
        config.insert("model_type".to_string(), Value::from(MODEL_TYPE));
        config
    }

    async fn fit(&mut self, batch: &Batch, params: &StepParams) -> TrainingResult<f64> {
        self.check_batch(batch)?;
        Ok(self.train_step(batch, params)?)
    }

    async fn predict(&self, batch: &Batch) -> TrainingResult<Vec<Vec<f32>>> {
        self.check_batch(batch)?;
        Ok(self.logits(batch)?)
    }

    async fn save(&self, dir: &Path) -> TrainingResult<Vec<TrainingArtifact>> {
        let path = dir.join(WEIGHTS_FILE);
        self.varmap.save(&path).map_err(|e| TrainingError::Artifact(e.to_string()))?;
        tracing::debug!(path = %path.display(), "weights written");
        Ok(vec![make_artifact(ArtifactKind::Weights, path)?])
    }
}


#[cfg(test)]
mod tests {
    use super::testing::write_base_checkpoint;
    use super::*;
    use crate::checkpoint::TOKENIZER_FILE;
    use crate::tokenizer::testing::TOKENIZER_JSON;
    use tempfile::TempDir;

    fn batch(rows: &[(&[u32], u32)]) -> Batch {
        let seq_len = rows.iter().map(|(ids, _)| ids.len()).max().unwrap_or(0);
        Batch {
            input_ids: rows.iter().map(|(ids, _)| ids.to_vec()).collect(),
            attention_mask: rows.iter().map(|(ids, _)| vec![1; ids.len()]).collect(),
            labels: rows.iter().map(|(_, label)| *label).collect(),
            seq_len,
        }
    }

    fn files(temp: &TempDir) -> CheckpointFiles {
        write_base_checkpoint(temp.path());
        std::fs::write(temp.path().join(TOKENIZER_FILE), TOKENIZER_JSON).unwrap();
        CheckpointFiles::from_dir(temp.path()).unwrap()
    }

    fn backend(temp: &TempDir, device: ComputeDevice) -> DistilBertBackend {
        DistilBertBackend::from_pretrained("base", &files(temp), 3, device, 7).unwrap()
    }

    #[tokio::test]
    async fn test_fit_learns_word_order() {
        let temp = TempDir::new().unwrap();
        let mut model = backend(&temp, ComputeDevice::Cpu);
        // Same bag of words, different order.
        let data = batch(&[(&[2, 3, 4], 1), (&[4, 3, 2], 2), (&[7, 7, 7], 0)]);
        let params = StepParams { learning_rate: 1e-2, weight_decay: 0.01 };

        let first = model.fit(&data, &params).await.unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = model.fit(&data, &params).await.unwrap();
        }
        assert!(last < first, "loss did not decrease: {first} -> {last}");

        let eval = model.evaluate(std::slice::from_ref(&data)).await.unwrap();
        let predicted: Vec<usize> =
            eval.prediction.logits.iter().map(|row| tweetsent_training::metrics::argmax(row).unwrap()).collect();
        assert_eq!(predicted, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn test_fit_updates_pretrained_encoder_weights() {
        let temp = TempDir::new().unwrap();
        let mut model = backend(&temp, ComputeDevice::Cpu);
        let name = "distilbert.embeddings.word_embeddings.weight";
        let before = lock_vars(&model.varmap).unwrap()[name].as_tensor().to_vec2::<f32>().unwrap();

        let data = batch(&[(&[2, 3], 1), (&[4, 5], 2)]);
        model.fit(&data, &StepParams { learning_rate: 1e-2, weight_decay: 0.0 }).await.unwrap();

        let after = lock_vars(&model.varmap).unwrap()[name].as_tensor().to_vec2::<f32>().unwrap();
        assert_ne!(before[2], after[2]);
        // Rows of tokens absent from the batch get no gradient.
        assert_eq!(before[6], after[6]);
    }

    #[test]
    fn test_same_seed_gives_same_head() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let name = "classifier.weight";
        let weights = |m: &DistilBertBackend| lock_vars(&m.varmap).unwrap()[name].as_tensor().to_vec2::<f32>().unwrap();
        assert_eq!(weights(&backend(&a, ComputeDevice::Cpu)), weights(&backend(&b, ComputeDevice::Cpu)));
    }

    #[test]
    fn test_unavailable_device_falls_back_to_cpu() {
        if available_devices().contains(&ComputeDevice::Cuda) {
            return;
        }
        let temp = TempDir::new().unwrap();
        assert_eq!(backend(&temp, ComputeDevice::Cuda).device(), ComputeDevice::Cpu);
    }

    #[tokio::test]
    async fn test_save_then_load_reproduces_predictions() {
        let temp = TempDir::new().unwrap();
        let mut model = backend(&temp, ComputeDevice::Cpu);
        let data = batch(&[(&[1, 2], 0), (&[3, 5], 2)]);
        model.fit(&data, &StepParams { learning_rate: 5e-3, weight_decay: 0.0 }).await.unwrap();

        let out = TempDir::new().unwrap();
        let artifacts = model.save(out.path()).await.unwrap();
        assert_eq!(artifacts.len(), 1);
        std::fs::write(out.path().join(CONFIG_FILE), serde_json::to_vec(&model.config_json()).unwrap()).unwrap();

        let loaded = DistilBertBackend::load(out.path(), model.model_spec(), 3).unwrap();
        let expected = model.predict(&data).await.unwrap();
        for (a, b) in loaded.predict(&data).await.unwrap().iter().flatten().zip(expected.iter().flatten()) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_saved_weights_include_the_whole_encoder() {
        let temp = TempDir::new().unwrap();
        let model = backend(&temp, ComputeDevice::Cpu);
        let out = TempDir::new().unwrap();
        model.varmap.save(out.path().join(WEIGHTS_FILE)).unwrap();

        let saved = candle_core::safetensors::load(out.path().join(WEIGHTS_FILE), &Device::Cpu).unwrap();
        for name in [
            "distilbert.embeddings.position_embeddings.weight",
            "distilbert.transformer.layer.0.attention.k_lin.weight",
            "distilbert.transformer.layer.0.sa_layer_norm.weight",
            "pre_classifier.bias",
            "classifier.weight",
        ] {
            assert!(saved.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn test_config_json_names_the_classification_architecture() {
        let temp = TempDir::new().unwrap();
        let config = backend(&temp, ComputeDevice::Cpu).config_json();
        assert_eq!(config["architectures"][0], ARCHITECTURE);
        assert_eq!(config["model_type"], MODEL_TYPE);
        assert_eq!(config["n_layers"], 1);
    }

    #[tokio::test]
    async fn test_out_of_vocab_token_is_an_error() {
        let temp = TempDir::new().unwrap();
        let model = backend(&temp, ComputeDevice::Cpu);
        let err = model.predict(&batch(&[(&[99], 0)])).await.unwrap_err();
        assert!(matches!(err, TrainingError::Backend(_)));
    }

    #[test]
    fn test_checkpoint_without_matching_weights_is_rejected() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        let tensor = Tensor::zeros(4, DType::F32, &Device::Cpu).unwrap();
        candle_core::safetensors::save(&HashMap::from([("other".to_string(), tensor)]), &files.weights).unwrap();

        let result = DistilBertBackend::from_pretrained("base", &files, 3, ComputeDevice::Cpu, 0);
        assert!(matches!(result, Err(HubError::Weights(_))));
    }

    #[test]
    fn test_mismatched_checkpoint_shape_is_rejected() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        let tensor = Tensor::zeros((5, 8), DType::F32, &Device::Cpu).unwrap();
        let tensors = HashMap::from([("distilbert.embeddings.word_embeddings.weight".to_string(), tensor)]);
        candle_core::safetensors::save(&tensors, &files.weights).unwrap();

        let err = DistilBertBackend::from_pretrained("base", &files, 3, ComputeDevice::Cpu, 0).err().unwrap();
        assert!(err.to_string().contains("word_embeddings"));
    }
}
