use crate::dataset::RawRow;
use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Which slice of a dataset to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRequest {
    pub dataset_id: String,
    pub config: String,
    pub split: String,
    pub max_rows: Option<usize>,
}

/// A read-only source of column-oriented rows.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    fn id(&self) -> &'static str;

    async fn fetch(&self, request: &DatasetRequest) -> TrainingResult<Vec<RawRow>>;
}

/// Rows from a local JSONL file (one JSON object per line).
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl DatasetSource for JsonlSource {
    fn id(&self) -> &'static str {
        "jsonl"
    }

    async fn fetch(&self, request: &DatasetRequest) -> TrainingResult<Vec<RawRow>> {
        read_jsonl_rows(&self.path, request.max_rows)
    }
}

/// Rows held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    rows: Vec<RawRow>,
}

impl InMemorySource {
    #[must_use]
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl DatasetSource for InMemorySource {
    fn id(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, request: &DatasetRequest) -> TrainingResult<Vec<RawRow>> {
        let limit = request.max_rows.unwrap_or(self.rows.len());
        Ok(self.rows.iter().take(limit).cloned().collect())
    }
}

pub fn read_jsonl_rows(path: &Path, max_rows: Option<usize>) -> TrainingResult<Vec<RawRow>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| TrainingError::Dataset(format!("failed to read {}: {}", path.display(), e)))?;
    let mut rows = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
            TrainingError::Dataset(format!("failed to parse jsonl line {}: {}", idx + 1, e))
        })?;
        let serde_json::Value::Object(row) = value else {
            return Err(TrainingError::Dataset(format!("jsonl line {} is not an object", idx + 1)));
        };
        rows.push(row);
        if max_rows.is_some_and(|max| rows.len() >= max) {
            break;
        }
    }

    Ok(rows)
}

pub fn write_jsonl_rows(path: &Path, rows: &[RawRow]) -> TrainingResult<()> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}
