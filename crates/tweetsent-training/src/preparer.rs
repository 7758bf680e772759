//! Dataset preparation: fetch, normalize, sample, split, tokenize.

use crate::config::{DatasetConfig, LabelMap, SentimentConfig};
use crate::dataset::{
    DatasetId, LabeledRecord, SplitRecords, class_counts, compute_dataset_id, normalize_records, select_columns,
};
use crate::error::{TrainingError, TrainingResult};
use crate::source::{DatasetRequest, DatasetSource};
use crate::split::{stratified_split, subsample};
use crate::tokenize::{TextEncoder, TokenizedDataset, TokenizedExample, encode_labeled};
use std::sync::Arc;

/// Records per tokenizer call when mapping over a collection.
pub const MAP_BATCH_SIZE: usize = 1000;

/// Tokenized train/test collections ready for the trainer.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub train: TokenizedDataset,
    pub test: TokenizedDataset,
    /// Content hash of the split sample (train followed by test).
    pub dataset_id: DatasetId,
}

pub struct DatasetPreparer {
    config: DatasetConfig,
    labels: LabelMap,
    max_len: usize,
    source: Arc<dyn DatasetSource>,
    encoder: Arc<dyn TextEncoder>,
}

impl DatasetPreparer {
    pub fn new(
        config: &SentimentConfig,
        source: Arc<dyn DatasetSource>,
        encoder: Arc<dyn TextEncoder>,
    ) -> TrainingResult<Self> {
        config.validate()?;
        Ok(Self {
            config: config.dataset.clone(),
            labels: config.model.label_map()?,
            max_len: config.model.max_len,
            source,
            encoder,
        })
    }

    /// Fetch the configured split and turn it into stratified train/test records.
    pub async fn create_data(&self) -> TrainingResult<SplitRecords> {
        let request = DatasetRequest {
            dataset_id: self.config.dataset_id.clone(),
            config: self.config.dataset_config.clone(),
            split: self.config.split.clone(),
            max_rows: self.config.max_rows,
        };
        tracing::info!(
            source = self.source.id(),
            dataset = %request.dataset_id,
            split = %request.split,
            "fetching dataset"
        );
        let rows = self.source.fetch(&request).await?;
        if rows.is_empty() {
            return Err(TrainingError::Dataset(format!("dataset {} returned no rows", request.dataset_id)));
        }

        let records = select_columns(&rows, &self.config.src_column, &self.config.tgt_column)?;
        let records = normalize_records(records, &self.config.label_remap, &self.labels)?;
        let sample = subsample(records, self.config.sample_size, self.config.seed)?;

        for (id, count) in class_counts(&sample, &self.labels) {
            tracing::debug!(label = self.labels.label(id).unwrap_or("?"), count, "sample class count");
        }

        stratified_split(sample, &self.labels, self.config.test_size, self.config.seed)
    }

    /// Encode one batch of records to fixed-length features.
    pub fn tokenize_function(&self, batch: &[LabeledRecord]) -> TrainingResult<Vec<TokenizedExample>> {
        let texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
        let labels: Vec<u32> = batch.iter().map(|r| r.label).collect();
        encode_labeled(self.encoder.as_ref(), &texts, &labels, self.max_len)
    }

    /// Tokenize a whole collection in batches of [`MAP_BATCH_SIZE`].
    pub fn preprocess_function(&self, records: &[LabeledRecord]) -> TrainingResult<TokenizedDataset> {
        let mut out = Vec::with_capacity(records.len());
        for chunk in records.chunks(MAP_BATCH_SIZE) {
            out.extend(self.tokenize_function(chunk)?);
        }
        Ok(out)
    }

    pub async fn gen_classification_dataset(&self) -> TrainingResult<PreparedDataset> {
        let split = self.create_data().await?;

        let mut sample = split.train.clone();
        sample.extend(split.test.iter().cloned());
        let dataset_id = compute_dataset_id(&sample)?;

        let train = self.preprocess_function(&split.train)?;
        let test = self.preprocess_function(&split.test)?;
        tracing::info!(train = train.len(), test = test.len(), dataset_id = %dataset_id.0, "dataset prepared");

        Ok(PreparedDataset { train, test, dataset_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RawRow;
    use crate::source::InMemorySource;
    use crate::tokenize::testing::WhitespaceEncoder;
    use serde_json::json;

    fn toy_rows() -> Vec<RawRow> {
        // 4 NEUTRAL (0), 3 POSITIVE (1), 3 NEGATIVE (-1 in source encoding)
        let rows = [
            ("Flat day for $SPY", 0),
            ("Nothing new on AAPL", 0),
            ("Watching BABA", 0),
            ("Volume is average", 0),
            ("Great weekend, long AAPL", 1),
            ("Calls printing", 1),
            ("TSLA breakout!", 1),
            ("Selling everything", -1),
            ("Puts on SPY", -1),
            ("Terrible earnings", -1),
        ];
        rows.iter()
            .map(|(text, label)| {
                json!({"tweet": text, "sentiment": label, "date": "2020-04-09"}).as_object().unwrap().clone()
            })
            .collect()
    }

    fn preparer(sample_size: Option<usize>) -> DatasetPreparer {
        let mut config = SentimentConfig::default();
        config.dataset.sample_size = sample_size;
        config.model.max_len = 8;
        DatasetPreparer::new(
            &config,
            Arc::new(InMemorySource::new(toy_rows())),
            Arc::new(WhitespaceEncoder { max_len: 8 }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_data_toy_scenario() {
        let split = preparer(None).create_data().await.unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 8);
        assert!(split.train.iter().chain(&split.test).all(|r| r.label <= 2));
        assert!(split.train.iter().chain(&split.test).all(|r| r.text == r.text.to_lowercase()));
    }

    #[tokio::test]
    async fn test_create_data_is_deterministic() {
        let a = preparer(Some(9)).create_data().await.unwrap();
        let b = preparer(Some(9)).create_data().await.unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);
    }

    #[tokio::test]
    async fn test_oversized_sample_fails() {
        let err = preparer(Some(20_000)).create_data().await.unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(_)));
    }

    #[tokio::test]
    async fn test_gen_classification_dataset_tokenizes_both_partitions() {
        let prepared = preparer(None).gen_classification_dataset().await.unwrap();
        assert_eq!(prepared.train.len(), 8);
        assert_eq!(prepared.test.len(), 2);
        assert!(prepared.train.iter().chain(&prepared.test).all(|e| e.input_ids.len() == 8));
        assert_eq!(prepared.dataset_id.0.len(), 64);
    }

    #[test]
    fn test_preprocess_preserves_order_and_labels() {
        let p = preparer(None);
        let records: Vec<LabeledRecord> = (0..2500)
            .map(|i| LabeledRecord { text: format!("row {i}"), label: (i % 3) as u32 })
            .collect();
        let out = p.preprocess_function(&records).unwrap();
        assert_eq!(out.len(), records.len());
        assert!(out.iter().zip(&records).all(|(e, r)| e.label == r.label));
    }
}
