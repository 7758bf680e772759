//! Text classification over a trained artifact.

use crate::backend::ModelBackend;
use crate::collator::DataCollatorWithPadding;
use crate::config::LabelMap;
use crate::error::{TrainingError, TrainingResult};
use crate::metrics::{argmax, softmax};
use crate::tokenize::{TextEncoder, encode_labeled};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Top label and its softmax probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

pub struct TextClassificationPipeline {
    backend: Box<dyn ModelBackend>,
    encoder: Arc<dyn TextEncoder>,
    labels: LabelMap,
    max_len: usize,
}

impl TextClassificationPipeline {
    pub fn new(
        backend: Box<dyn ModelBackend>,
        encoder: Arc<dyn TextEncoder>,
        labels: LabelMap,
        max_len: usize,
    ) -> TrainingResult<Self> {
        if backend.num_labels() != labels.len() {
            return Err(TrainingError::Artifact(format!(
                "model has {} outputs but the label map has {} entries",
                backend.num_labels(),
                labels.len()
            )));
        }
        Ok(Self { backend, encoder, labels, max_len })
    }

    #[must_use]
    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub async fn classify(&self, text: &str) -> TrainingResult<Prediction> {
        self.classify_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| TrainingError::Backend("no prediction returned".to_string()))
    }

    /// Classify texts in order. Input is lower-cased the same way training data was.
    pub async fn classify_batch(&self, texts: &[String]) -> TrainingResult<Vec<Prediction>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
        let placeholder = vec![0; lowered.len()];
        let examples = encode_labeled(self.encoder.as_ref(), &lowered, &placeholder, self.max_len)?;
        let refs: Vec<_> = examples.iter().collect();
        let batch = DataCollatorWithPadding::new(self.encoder.pad_token_id()).collate(&refs)?;

        let logits = self.backend.predict(&batch).await?;
        if logits.len() != texts.len() {
            return Err(TrainingError::Backend(format!(
                "backend returned {} logit rows for {} texts",
                logits.len(),
                texts.len()
            )));
        }

        logits
            .iter()
            .map(|row| {
                let probs = softmax(row);
                let id = argmax(&probs).ok_or_else(|| TrainingError::Backend("empty logits".to_string()))?;
                let label = u32::try_from(id)
                    .ok()
                    .and_then(|id| self.labels.label(id))
                    .ok_or_else(|| TrainingError::Artifact(format!("class {id} has no label")))?;
                Ok(Prediction { label: label.to_string(), score: probs[id] })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::MajorityBackend;
    use crate::tokenize::testing::WhitespaceEncoder;

    fn pipeline(counts: Vec<u64>) -> TextClassificationPipeline {
        let mut backend = MajorityBackend::new(counts.len());
        backend.counts = counts;
        TextClassificationPipeline::new(
            Box::new(backend),
            Arc::new(WhitespaceEncoder { max_len: 8 }),
            LabelMap::from_names(&["NEUTRAL", "POSITIVE", "NEGATIVE"]).unwrap(),
            8,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_classify_returns_top_label() {
        let p = pipeline(vec![1, 10, 1]);
        let prediction = p.classify("Great weekend, long AAPL").await.unwrap();
        assert_eq!(prediction.label, "POSITIVE");
        assert!(prediction.score > 0.5 && prediction.score <= 1.0);
    }

    #[tokio::test]
    async fn test_classify_batch_preserves_order_and_length() {
        let p = pipeline(vec![0, 0, 9]);
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let out = p.classify_batch(&texts).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|pr| pr.label == "NEGATIVE"));
        assert!(p.classify_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_label_count_mismatch_is_rejected() {
        let result = TextClassificationPipeline::new(
            Box::new(MajorityBackend::new(2)),
            Arc::new(WhitespaceEncoder { max_len: 8 }),
            LabelMap::from_names(&["NEUTRAL", "POSITIVE", "NEGATIVE"]).unwrap(),
            8,
        );
        assert!(result.is_err());
    }
}
