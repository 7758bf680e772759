//! DistilBERT encoder with a sequence classification head, built from
//! candle-nn layers so every parameter is a trainable `Var`.
//!
//! Parameter names follow the Hugging Face `DistilBertForSequenceClassification`
//! layout, so base checkpoints load by name and saved weights load back in
//! `transformers`.

use candle_core::{D, DType, IndexOp, Module, Result, Tensor};
use candle_nn::{Embedding, Init, Linear, VarBuilder, embedding, linear, ops::softmax};
use serde::Deserialize;

pub const ARCHITECTURE: &str = "DistilBertForSequenceClassification";
pub const MODEL_TYPE: &str = "distilbert";

const LAYER_NORM_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Gelu,
    Relu,
}

/// Hyperparameters read from a checkpoint's `config.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DistilBertConfig {
    pub vocab_size: usize,
    pub dim: usize,
    pub n_layers: usize,
    pub n_heads: usize,
    pub hidden_dim: usize,
    #[serde(default)]
    pub activation: Activation,
    pub max_position_embeddings: usize,
    #[serde(default = "default_initializer_range")]
    pub initializer_range: f64,
    #[serde(default)]
    pub pad_token_id: u32,
}

fn default_initializer_range() -> f64 {
    0.02
}

impl DistilBertConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.n_heads == 0 || !self.dim.is_multiple_of(self.n_heads) {
            return Err(format!("dim {} is not divisible by n_heads {}", self.dim, self.n_heads));
        }
        if self.vocab_size == 0 || self.max_position_embeddings == 0 {
            return Err("vocab_size and max_position_embeddings must be positive".to_string());
        }
        Ok(())
    }
}

/// Layer normalization over the last dimension, composed from differentiable ops.
#[derive(Debug, Clone)]
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    fn load(dim: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(variance + LAYER_NORM_EPS)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

#[derive(Debug, Clone)]
struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    layer_norm: LayerNorm,
}

impl Embeddings {
    fn load(config: &DistilBertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            word_embeddings: embedding(config.vocab_size, config.dim, vb.pp("word_embeddings"))?,
            position_embeddings: embedding(config.max_position_embeddings, config.dim, vb.pp("position_embeddings"))?,
            layer_norm: LayerNorm::load(config.dim, vb.pp("LayerNorm"))?,
        })
    }

    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let words = self.word_embeddings.forward(input_ids)?;
        let positions = self.position_embeddings.forward(&positions)?;
        self.layer_norm.forward(&words.broadcast_add(&positions)?)
    }
}

#[derive(Debug, Clone)]
struct MultiHeadSelfAttention {
    q_lin: Linear,
    k_lin: Linear,
    v_lin: Linear,
    out_lin: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl MultiHeadSelfAttention {
    fn load(config: &DistilBertConfig, vb: VarBuilder) -> Result<Self> {
        let dim = config.dim;
        Ok(Self {
            q_lin: linear(dim, dim, vb.pp("q_lin"))?,
            k_lin: linear(dim, dim, vb.pp("k_lin"))?,
            v_lin: linear(dim, dim, vb.pp("v_lin"))?,
            out_lin: linear(dim, dim, vb.pp("out_lin"))?,
            n_heads: config.n_heads,
            head_dim: dim / config.n_heads,
        })
    }

    /// `mask_bias` is `(batch, 1, 1, seq)`: zero for real tokens, a large
    /// negative value for padding.
    fn forward(&self, xs: &Tensor, mask_bias: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, dim) = xs.dims3()?;
        let heads = |t: Tensor| -> Result<Tensor> {
            t.reshape((batch, seq_len, self.n_heads, self.head_dim))?.transpose(1, 2)?.contiguous()
        };
        let q = heads(self.q_lin.forward(xs)?)?;
        let k = heads(self.k_lin.forward(xs)?)?;
        let v = heads(self.v_lin.forward(xs)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q.matmul(&k.t()?.contiguous()?)?.affine(scale, 0.0)?;
        let weights = softmax(&scores.broadcast_add(mask_bias)?, D::Minus1)?;
        let context = weights.matmul(&v)?.transpose(1, 2)?.reshape((batch, seq_len, dim))?;
        self.out_lin.forward(&context)
    }
}

#[derive(Debug, Clone)]
struct FeedForward {
    lin1: Linear,
    lin2: Linear,
    activation: Activation,
}

impl FeedForward {
    fn load(config: &DistilBertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            lin1: linear(config.dim, config.hidden_dim, vb.pp("lin1"))?,
            lin2: linear(config.hidden_dim, config.dim, vb.pp("lin2"))?,
            activation: config.activation,
        })
    }
}

impl Module for FeedForward {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let hidden = self.lin1.forward(xs)?;
        let hidden = match self.activation {
            Activation::Gelu => hidden.gelu_erf()?,
            Activation::Relu => hidden.relu()?,
        };
        self.lin2.forward(&hidden)
    }
}

#[derive(Debug, Clone)]
struct TransformerBlock {
    attention: MultiHeadSelfAttention,
    sa_layer_norm: LayerNorm,
    ffn: FeedForward,
    output_layer_norm: LayerNorm,
}

impl TransformerBlock {
    fn load(config: &DistilBertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            attention: MultiHeadSelfAttention::load(config, vb.pp("attention"))?,
            sa_layer_norm: LayerNorm::load(config.dim, vb.pp("sa_layer_norm"))?,
            ffn: FeedForward::load(config, vb.pp("ffn"))?,
            output_layer_norm: LayerNorm::load(config.dim, vb.pp("output_layer_norm"))?,
        })
    }

    fn forward(&self, xs: &Tensor, mask_bias: &Tensor) -> Result<Tensor> {
        let attended = self.sa_layer_norm.forward(&(self.attention.forward(xs, mask_bias)? + xs)?)?;
        self.output_layer_norm.forward(&(self.ffn.forward(&attended)? + &attended)?)
    }
}

/// Encoder plus `pre_classifier` and `classifier` heads over the first token.
#[derive(Debug, Clone)]
pub struct DistilBertForSequenceClassification {
    embeddings: Embeddings,
    layers: Vec<TransformerBlock>,
    pre_classifier: Linear,
    classifier: Linear,
}

impl DistilBertForSequenceClassification {
    pub fn load(vb: VarBuilder, config: &DistilBertConfig, num_labels: usize) -> Result<Self> {
        let encoder = vb.pp("distilbert");
        let embeddings = Embeddings::load(config, encoder.pp("embeddings"))?;
        let blocks = encoder.pp("transformer").pp("layer");
        let layers = (0..config.n_layers)
            .map(|i| TransformerBlock::load(config, blocks.pp(i.to_string())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            embeddings,
            layers,
            pre_classifier: linear(config.dim, config.dim, vb.pp("pre_classifier"))?,
            classifier: linear(config.dim, num_labels, vb.pp("classifier"))?,
        })
    }

    /// Logits of shape `(batch, num_labels)` for `u32` ids and mask of shape `(batch, seq)`.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
        let (batch, seq_len) = input_ids.dims2()?;
        let mask_bias =
            attention_mask.to_dtype(DType::F32)?.affine(1e4, -1e4)?.reshape((batch, 1, 1, seq_len))?;

        let mut hidden = self.embeddings.forward(input_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_bias)?;
        }
        let first_token = hidden.i((.., 0))?;
        let pooled = self.pre_classifier.forward(&first_token)?.relu()?;
        self.classifier.forward(&pooled)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::tiny_config;
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    fn model() -> (VarMap, DistilBertForSequenceClassification) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = DistilBertForSequenceClassification::load(vb, &tiny_config(), 3).unwrap();
        (varmap, model)
    }

    fn ids(rows: &[[u32; 3]]) -> Tensor {
        Tensor::from_vec(rows.concat(), (rows.len(), 3), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_parameter_names_follow_hub_layout() {
        let (varmap, _) = model();
        let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
        for expected in [
            "distilbert.embeddings.word_embeddings.weight",
            "distilbert.embeddings.LayerNorm.weight",
            "distilbert.transformer.layer.0.attention.q_lin.weight",
            "distilbert.transformer.layer.0.ffn.lin2.bias",
            "distilbert.transformer.layer.0.output_layer_norm.bias",
            "pre_classifier.weight",
            "classifier.bias",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_logits_depend_on_word_order() {
        let (_, model) = model();
        let mask = ids(&[[1, 1, 1], [1, 1, 1]]);
        let logits = model.forward(&ids(&[[1, 2, 3], [3, 2, 1]]), &mask).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(logits.len(), 2);
        assert_eq!(logits[0].len(), 3);
        assert_ne!(logits[0], logits[1]);
    }

    #[test]
    fn test_padding_is_masked_out() {
        let (_, model) = model();
        let padded = model.forward(&ids(&[[1, 2, 5]]), &ids(&[[1, 1, 0]])).unwrap().to_vec2::<f32>().unwrap();
        let other = model.forward(&ids(&[[1, 2, 6]]), &ids(&[[1, 1, 0]])).unwrap().to_vec2::<f32>().unwrap();
        for (a, b) in padded[0].iter().zip(&other[0]) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_layer_norm_has_gradients() {
        let (varmap, model) = model();
        let logits = model.forward(&ids(&[[1, 2, 3]]), &ids(&[[1, 1, 1]])).unwrap();
        let grads = logits.sum_all().unwrap().backward().unwrap();
        let data = varmap.data().lock().unwrap();
        let norm = &data["distilbert.transformer.layer.0.output_layer_norm.bias"];
        assert!(grads.get(norm.as_tensor()).is_some());
    }

    #[test]
    fn test_indivisible_heads_are_rejected() {
        let config = DistilBertConfig { n_heads: 3, ..tiny_config() };
        assert!(config.validate().is_err());
    }
}
