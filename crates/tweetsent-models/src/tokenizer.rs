use crate::error::{HubError, HubResult};
use std::path::{Path, PathBuf};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tweetsent_training::{Encoding, TextEncoder, TrainingError, TrainingResult};

const PAD_TOKEN: &str = "[PAD]";

/// A `tokenizer.json` tokenizer padded and truncated to a fixed length.
pub struct HfTokenizerEncoder {
    tokenizer: Tokenizer,
    pad_token_id: u32,
    max_len: usize,
}

impl HfTokenizerEncoder {
    pub fn from_file(path: &Path, max_len: usize) -> HubResult<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| HubError::Tokenizer(format!("failed to load {}: {e}", path.display())))?;
        Self::new(tokenizer, max_len)
    }

    /// Reload a tokenizer saved by [`TextEncoder::save`], keeping the
    /// truncation length it was trained with.
    pub fn from_saved(path: &Path) -> HubResult<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| HubError::Tokenizer(format!("failed to load {}: {e}", path.display())))?;
        let max_len = tokenizer
            .get_truncation()
            .map(|t| t.max_length)
            .ok_or_else(|| HubError::Tokenizer(format!("{} has no truncation length", path.display())))?;
        Self::new(tokenizer, max_len)
    }

    #[must_use]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn new(mut tokenizer: Tokenizer, max_len: usize) -> HubResult<Self> {
        let pad_token_id = tokenizer.token_to_id(PAD_TOKEN).unwrap_or(0);
        tokenizer
            .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
            .map_err(|e| HubError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_len),
            pad_id: pad_token_id,
            pad_token: PAD_TOKEN.to_string(),
            ..Default::default()
        }));
        Ok(Self { tokenizer, pad_token_id, max_len })
    }
}

impl TextEncoder for HfTokenizerEncoder {
    fn encode_batch(&self, texts: &[String]) -> TrainingResult<Vec<Encoding>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| TrainingError::Tokenizer(e.to_string()))?;
        Ok(encodings
            .iter()
            .map(|e| Encoding { input_ids: e.get_ids().to_vec(), attention_mask: e.get_attention_mask().to_vec() })
            .collect())
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    fn save(&self, dir: &Path) -> TrainingResult<PathBuf> {
        let path = dir.join(crate::checkpoint::TOKENIZER_FILE);
        self.tokenizer.save(&path, false).map_err(|e| TrainingError::Tokenizer(e.to_string()))?;
        Ok(path)
    }
}
