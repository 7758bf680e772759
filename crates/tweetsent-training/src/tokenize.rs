use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Numeric encoding of one text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl Encoding {
    /// Truncate or right-pad to exactly `len` positions.
    #[must_use]
    pub fn fit_to_length(mut self, len: usize, pad_token_id: u32) -> Self {
        self.input_ids.resize(len, pad_token_id);
        self.attention_mask.resize(len, 0);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Tokenizer capability: maps text to token ids.
///
/// Implementations are expected to truncate and pad to their configured
/// maximum length; callers still enforce the bound.
pub trait TextEncoder: Send + Sync {
    fn encode_batch(&self, texts: &[String]) -> TrainingResult<Vec<Encoding>>;

    fn pad_token_id(&self) -> u32;

    fn vocab_size(&self) -> usize;

    /// Persist the tokenizer into an artifact directory.
    fn save(&self, dir: &Path) -> TrainingResult<PathBuf>;
}

/// A tokenized record ready for batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub label: u32,
}

pub type TokenizedDataset = Vec<TokenizedExample>;

/// Encode texts and attach labels, bounding every sequence to `max_len`.
pub fn encode_labeled(
    encoder: &dyn TextEncoder,
    texts: &[String],
    labels: &[u32],
    max_len: usize,
) -> TrainingResult<Vec<TokenizedExample>> {
    if texts.len() != labels.len() {
        return Err(TrainingError::Tokenizer(format!(
            "{} texts but {} labels",
            texts.len(),
            labels.len()
        )));
    }

    let encodings = encoder.encode_batch(texts)?;
    if encodings.len() != texts.len() {
        return Err(TrainingError::Tokenizer(format!(
            "encoder returned {} encodings for {} texts",
            encodings.len(),
            texts.len()
        )));
    }

    let pad = encoder.pad_token_id();
    Ok(encodings
        .into_iter()
        .zip(labels)
        .map(|(encoding, label)| {
            let Encoding { input_ids, attention_mask } = encoding.fit_to_length(max_len, pad);
            TokenizedExample { input_ids, attention_mask, label: *label }
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic whitespace encoder used across the crate's tests.

    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    pub const VOCAB: usize = 64;

    /// `[CLS] tokens... [SEP]` with token ids from a stable hash.
    #[derive(Debug, Clone)]
    pub struct WhitespaceEncoder {
        pub max_len: usize,
    }

    impl WhitespaceEncoder {
        pub fn token_id(word: &str) -> u32 {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            3 + (hasher.finish() % (VOCAB as u64 - 3)) as u32
        }
    }

    impl TextEncoder for WhitespaceEncoder {
        fn encode_batch(&self, texts: &[String]) -> TrainingResult<Vec<Encoding>> {
            Ok(texts
                .iter()
                .map(|text| {
                    let mut ids = vec![1];
                    ids.extend(text.split_whitespace().map(Self::token_id));
                    ids.truncate(self.max_len.saturating_sub(1));
                    ids.push(2);
                    let mask = vec![1; ids.len()];
                    Encoding { input_ids: ids, attention_mask: mask }.fit_to_length(self.max_len, 0)
                })
                .collect())
        }

        fn pad_token_id(&self) -> u32 {
            0
        }

        fn vocab_size(&self) -> usize {
            VOCAB
        }

        fn save(&self, dir: &Path) -> TrainingResult<PathBuf> {
            let path = dir.join("tokenizer.json");
            std::fs::write(&path, format!("{{\"max_len\": {}}}", self.max_len))?;
            Ok(path)
        }
    }
}
