use crate::error::{TrainingError, TrainingResult};
use crate::tokenize::TokenizedExample;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// A uniform-shape batch: every row has `seq_len` positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub labels: Vec<u32>,
    pub seq_len: usize,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Pads every example in a batch to the longest sequence in that batch.
#[derive(Debug, Clone, Copy)]
pub struct DataCollatorWithPadding {
    pad_token_id: u32,
}

impl DataCollatorWithPadding {
    #[must_use]
    pub fn new(pad_token_id: u32) -> Self {
        Self { pad_token_id }
    }

    pub fn collate(&self, examples: &[&TokenizedExample]) -> TrainingResult<Batch> {
        if examples.is_empty() {
            return Err(TrainingError::Dataset("cannot collate an empty batch".to_string()));
        }
        let seq_len = examples.iter().map(|e| e.input_ids.len()).max().unwrap_or(0);

        let mut batch = Batch {
            input_ids: Vec::with_capacity(examples.len()),
            attention_mask: Vec::with_capacity(examples.len()),
            labels: Vec::with_capacity(examples.len()),
            seq_len,
        };
        for example in examples {
            if example.input_ids.len() != example.attention_mask.len() {
                return Err(TrainingError::Dataset("input_ids and attention_mask lengths differ".to_string()));
            }
            let mut ids = example.input_ids.clone();
            ids.resize(seq_len, self.pad_token_id);
            let mut mask = example.attention_mask.clone();
            mask.resize(seq_len, 0);
            batch.input_ids.push(ids);
            batch.attention_mask.push(mask);
            batch.labels.push(example.label);
        }
        Ok(batch)
    }

    /// Split a dataset into collated batches, optionally shuffled.
    pub fn batches(
        &self,
        dataset: &[TokenizedExample],
        batch_size: usize,
        rng: Option<&mut StdRng>,
    ) -> TrainingResult<Vec<Batch>> {
        if batch_size == 0 {
            return Err(TrainingError::Config("batch_size must be >= 1".to_string()));
        }
        let mut order: Vec<&TokenizedExample> = dataset.iter().collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order.chunks(batch_size).map(|chunk| self.collate(chunk)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn example(len: usize, label: u32) -> TokenizedExample {
        TokenizedExample { input_ids: vec![7; len], attention_mask: vec![1; len], label }
    }

    #[test]
    fn test_collate_pads_to_longest() {
        let collator = DataCollatorWithPadding::new(0);
        let a = example(2, 0);
        let b = example(4, 1);
        let batch = collator.collate(&[&a, &b]).unwrap();
        assert_eq!(batch.seq_len, 4);
        assert_eq!(batch.input_ids[0], vec![7, 7, 0, 0]);
        assert_eq!(batch.attention_mask[0], vec![1, 1, 0, 0]);
        assert_eq!(batch.labels, vec![0, 1]);
    }

    #[test]
    fn test_batches_cover_dataset() {
        let collator = DataCollatorWithPadding::new(0);
        let data: Vec<_> = (0..10).map(|i| example(3, i % 3)).collect();
        let batches = collator.batches(&data, 4, None).unwrap();
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4, 2]);

        let mut rng = StdRng::seed_from_u64(0);
        let shuffled = collator.batches(&data, 4, Some(&mut rng)).unwrap();
        assert_eq!(shuffled.iter().map(Batch::len).sum::<usize>(), 10);
    }

    #[test]
    fn test_empty_batch_rejected() {
        assert!(DataCollatorWithPadding::new(0).collate(&[]).is_err());
    }
}
