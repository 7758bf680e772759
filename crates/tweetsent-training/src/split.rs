//! Seeded subsampling and stratified train/test splitting.
//!
//! The test partition holds `ceil(test_size * n)` rows. Per-class test counts
//! are apportioned by largest remainder (ties go to the lower class id), so
//! every class lands within one row of its exact proportional share.

use crate::config::LabelMap;
use crate::dataset::{LabeledRecord, SplitRecords, class_counts};
use crate::error::{TrainingError, TrainingResult};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Guards `ceil` against products like `0.2 * 20000 = 4000.0000000000005`.
const CEIL_EPSILON: f64 = 1e-9;

/// Draw `size` records uniformly without replacement. `None` keeps everything.
pub fn subsample(mut records: Vec<LabeledRecord>, size: Option<usize>, seed: u64) -> TrainingResult<Vec<LabeledRecord>> {
    let Some(size) = size else {
        return Ok(records);
    };
    if size > records.len() {
        return Err(TrainingError::Dataset(format!(
            "cannot sample {size} rows from {} available",
            records.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);
    records.truncate(size);
    Ok(records)
}

/// Number of rows assigned to the test partition.
#[must_use]
pub fn test_count(n: usize, test_size: f64) -> usize {
    let raw = (test_size * n as f64 - CEIL_EPSILON).ceil();
    if raw <= 0.0 { 0 } else { (raw as usize).min(n) }
}

pub fn stratified_split(
    records: Vec<LabeledRecord>,
    labels: &LabelMap,
    test_size: f64,
    seed: u64,
) -> TrainingResult<SplitRecords> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(TrainingError::Config(format!("test_size must be in (0, 1), got {test_size}")));
    }

    let n = records.len();
    let n_test = test_count(n, test_size);
    if n_test == 0 || n_test >= n {
        return Err(TrainingError::Dataset(format!(
            "split of {n} rows with test_size {test_size} leaves an empty partition"
        )));
    }

    if let Some(record) = records.iter().find(|r| labels.label(r.label).is_none()) {
        return Err(TrainingError::Dataset(format!(
            "label id {} is not in the label map ({} classes)",
            record.label,
            labels.len()
        )));
    }

    let counts = class_counts(&records, labels);
    if let Some((id, _)) = counts.iter().find(|(_, count)| *count == 0) {
        return Err(TrainingError::Dataset(format!(
            "class {} ({id}) has no records in the sample; stratified split needs every class",
            labels.label(*id).unwrap_or("?")
        )));
    }

    let allocation = apportion(&counts, n, n_test);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut by_class: Vec<Vec<LabeledRecord>> = counts.iter().map(|(_, c)| Vec::with_capacity(*c)).collect();
    for record in records {
        if let Some(class) = counts.iter().position(|(id, _)| *id == record.label) {
            by_class[class].push(record);
        }
    }

    let mut split = SplitRecords::default();
    for (group, take) in by_class.iter_mut().zip(allocation) {
        group.shuffle(&mut rng);
        let train = group.split_off(take);
        split.test.append(group);
        split.train.extend(train);
    }
    split.train.shuffle(&mut rng);
    split.test.shuffle(&mut rng);

    tracing::debug!(train = split.train.len(), test = split.test.len(), "stratified split");
    Ok(split)
}

/// Largest-remainder apportionment of `n_test` rows across classes.
fn apportion(counts: &[(u32, usize)], n: usize, n_test: usize) -> Vec<usize> {
    let exact: Vec<f64> = counts.iter().map(|(_, c)| *c as f64 * n_test as f64 / n as f64).collect();
    let mut allocation: Vec<usize> = counts
        .iter()
        .zip(&exact)
        .map(|((_, c), e)| (e.floor() as usize).min(*c))
        .collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by(|&a, &b| {
        let fa = exact[a] - exact[a].floor();
        let fb = exact[b] - exact[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });

    let mut remaining = n_test.saturating_sub(allocation.iter().sum());
    while remaining > 0 {
        let before = remaining;
        for &i in &order {
            if remaining == 0 {
                break;
            }
            if allocation[i] < counts[i].1 {
                allocation[i] += 1;
                remaining -= 1;
            }
        }
        if remaining == before {
            break;
        }
    }
    allocation
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn labels() -> LabelMap {
        LabelMap::from_names(&["NEUTRAL", "POSITIVE", "NEGATIVE"]).unwrap()
    }

    fn records(per_class: &[usize]) -> Vec<LabeledRecord> {
        per_class
            .iter()
            .enumerate()
            .flat_map(|(label, count)| {
                (0..*count).map(move |i| LabeledRecord { text: format!("class {label} row {i}"), label: label as u32 })
            })
            .collect()
    }

    fn multiset(records: &[LabeledRecord]) -> HashMap<LabeledRecord, usize> {
        let mut out = HashMap::new();
        for r in records {
            *out.entry(r.clone()).or_insert(0) += 1;
        }
        out
    }

    #[test]
    fn test_label_outside_map_is_a_dataset_error() {
        let mut data = records(&[4, 3, 3]);
        data.push(LabeledRecord { text: "stray".to_string(), label: 7 });
        let err = stratified_split(data, &labels(), 0.2, 0).unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(ref msg) if msg.contains("label id 7")));
    }

    #[test]
    fn test_toy_split_has_two_test_rows() {
        let split = stratified_split(records(&[4, 3, 3]), &labels(), 0.2, 0).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.test.iter().filter(|r| r.label == 0).count(), 1);
        assert_eq!(split.test.iter().filter(|r| r.label == 1).count(), 1);
    }

    #[test]
    fn test_split_is_disjoint_and_complete() {
        let sample = records(&[40, 35, 25]);
        let split = stratified_split(sample.clone(), &labels(), 0.2, 7).unwrap();

        let train = multiset(&split.train);
        assert!(split.test.iter().all(|r| !train.contains_key(r)));

        let mut union = split.train.clone();
        union.extend(split.test.clone());
        assert_eq!(multiset(&union), multiset(&sample));
    }

    #[test]
    fn test_split_preserves_class_proportions() {
        let counts = [503, 311, 186];
        let n: usize = counts.iter().sum();
        let split = stratified_split(records(&counts), &labels(), 0.2, 3).unwrap();
        assert_eq!(split.test.len(), test_count(n, 0.2));

        for (label, count) in counts.iter().enumerate() {
            let expected = *count as f64 * split.test.len() as f64 / n as f64;
            let actual = split.test.iter().filter(|r| r.label == label as u32).count() as f64;
            assert!((actual - expected).abs() < 1.0, "class {label}: {actual} vs {expected}");
        }
    }

    #[test]
    fn test_split_is_deterministic_for_seed() {
        let a = stratified_split(records(&[10, 10, 10]), &labels(), 0.3, 42).unwrap();
        let b = stratified_split(records(&[10, 10, 10]), &labels(), 0.3, 42).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.test, b.test);
    }

    #[test]
    fn test_missing_class_fails() {
        let err = stratified_split(records(&[5, 5, 0]), &labels(), 0.2, 0).unwrap_err();
        assert!(err.to_string().contains("NEGATIVE"));
    }

    #[test]
    fn test_empty_partition_fails() {
        assert!(stratified_split(records(&[1, 1, 1]), &labels(), 0.01, 0).is_ok());
        assert!(stratified_split(records(&[1, 0, 0]), &labels(), 0.5, 0).is_err());
        assert!(stratified_split(Vec::new(), &labels(), 0.2, 0).is_err());
    }

    #[test]
    fn test_test_count_rounds_up() {
        assert_eq!(test_count(10, 0.2), 2);
        assert_eq!(test_count(20_000, 0.2), 4000);
        assert_eq!(test_count(11, 0.2), 3);
        assert_eq!(test_count(3, 0.01), 1);
    }

    #[test]
    fn test_subsample_size_and_determinism() {
        let a = subsample(records(&[20, 20, 20]), Some(15), 1).unwrap();
        let b = subsample(records(&[20, 20, 20]), Some(15), 1).unwrap();
        assert_eq!(a.len(), 15);
        assert_eq!(a, b);
        assert_eq!(subsample(records(&[2, 2, 2]), None, 1).unwrap().len(), 6);
    }

    #[test]
    fn test_subsample_larger_than_available_fails() {
        assert!(subsample(records(&[1, 1, 1]), Some(4), 0).is_err());
    }
}
