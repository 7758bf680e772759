use crate::config::{LabelMap, LabelRemap, remap_label};
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One row as returned by a dataset source: column name to value.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Stable identifier for a prepared sample (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub String);

/// A `(text, label)` pair with the label still in source encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub text: String,
    pub label: i64,
}

/// A record whose label is a valid class id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabeledRecord {
    pub text: String,
    pub label: u32,
}

/// Train and test partitions of a labeled sample.
#[derive(Debug, Clone, Default)]
pub struct SplitRecords {
    pub train: Vec<LabeledRecord>,
    pub test: Vec<LabeledRecord>,
}

/// Reduce rows to the text and label columns.
pub fn select_columns(rows: &[RawRow], src_column: &str, tgt_column: &str) -> TrainingResult<Vec<RawRecord>> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            let text = row
                .get(src_column)
                .ok_or_else(|| TrainingError::Dataset(format!("row {idx} has no column '{src_column}'")))?;
            let label = row
                .get(tgt_column)
                .ok_or_else(|| TrainingError::Dataset(format!("row {idx} has no column '{tgt_column}'")))?;

            let text = text
                .as_str()
                .ok_or_else(|| TrainingError::Dataset(format!("row {idx}: '{src_column}' is not a string")))?;
            let label = label_as_i64(label)
                .ok_or_else(|| TrainingError::Dataset(format!("row {idx}: '{tgt_column}' is not an integer")))?;

            Ok(RawRecord { text: text.to_string(), label })
        })
        .collect()
}

fn label_as_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| {
            // Some exports store integral labels as floats (e.g. 1.0).
            n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)
        }),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Lower-case text and map source labels onto class ids.
pub fn normalize_records(
    records: Vec<RawRecord>,
    rules: &[LabelRemap],
    labels: &LabelMap,
) -> TrainingResult<Vec<LabeledRecord>> {
    records
        .into_iter()
        .enumerate()
        .map(|(idx, record)| {
            let remapped = remap_label(record.label, rules);
            let label = u32::try_from(remapped)
                .ok()
                .filter(|id| labels.contains_id(*id))
                .ok_or_else(|| {
                    TrainingError::Dataset(format!(
                        "record {idx}: label {} (remapped to {remapped}) is not a known class id",
                        record.label
                    ))
                })?;
            Ok(LabeledRecord { text: record.text.to_lowercase(), label })
        })
        .collect()
}

pub fn compute_dataset_id(records: &[LabeledRecord]) -> TrainingResult<DatasetId> {
    let mut hasher = Sha256::new();

    for record in records {
        let bytes = serde_json::to_vec(record)?;
        hasher.update(bytes);
        hasher.update(b"\n");
    }

    Ok(DatasetId(hex::encode(hasher.finalize())))
}

/// Count records per class id, including classes with no records.
#[must_use]
pub fn class_counts(records: &[LabeledRecord], labels: &LabelMap) -> Vec<(u32, usize)> {
    labels
        .ids()
        .map(|id| (id, records.iter().filter(|r| r.label == id).count()))
        .collect()
}
