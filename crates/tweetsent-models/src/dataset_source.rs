//! Remote dataset rows through the datasets-server `/rows` API.

use crate::error::HubError;
use crate::hub::HubClient;
use async_trait::async_trait;
use serde::Deserialize;
use tweetsent_training::{DatasetRequest, DatasetSource, RawRow, TrainingError, TrainingResult};

/// Maximum page length the rows endpoint accepts.
pub const PAGE_LENGTH: usize = 100;

#[derive(Debug, Deserialize)]
struct RowsPage {
    rows: Vec<RowEntry>,
    #[serde(default)]
    num_rows_total: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RowEntry {
    row: RawRow,
}

pub struct HubDatasetSource {
    client: HubClient,
}

impl HubDatasetSource {
    #[must_use]
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }

    async fn fetch_page(&self, request: &DatasetRequest, offset: usize, length: usize) -> Result<RowsPage, HubError> {
        let url = format!("{}/rows", self.client.endpoints().datasets_server);
        let query = [
            ("dataset", request.dataset_id.clone()),
            ("config", request.config.clone()),
            ("split", request.split.clone()),
            ("offset", offset.to_string()),
            ("length", length.to_string()),
        ];
        self.client.send_json(&url, self.client.get(&url).query(&query)).await
    }
}

#[async_trait]
impl DatasetSource for HubDatasetSource {
    fn id(&self) -> &'static str {
        "hub"
    }

    async fn fetch(&self, request: &DatasetRequest) -> TrainingResult<Vec<RawRow>> {
        let mut rows = Vec::new();
        loop {
            let remaining = request.max_rows.map_or(PAGE_LENGTH, |max| max.saturating_sub(rows.len()));
            let length = remaining.min(PAGE_LENGTH);
            if length == 0 {
                break;
            }

            let page = self.fetch_page(request, rows.len(), length).await.map_err(|e| match e.status() {
                Some(404 | 422) => TrainingError::Config(format!(
                    "dataset {}/{}/{} not found: {e}",
                    request.dataset_id, request.config, request.split
                )),
                _ => TrainingError::Dataset(e.to_string()),
            })?;

            let fetched = page.rows.len();
            rows.extend(page.rows.into_iter().map(|entry| entry.row));
            tracing::debug!(dataset = %request.dataset_id, fetched, total = rows.len(), "fetched rows page");

            let exhausted = page.num_rows_total.is_some_and(|total| rows.len() >= total);
            if fetched < length || exhausted {
                break;
            }
        }
        tracing::info!(dataset = %request.dataset_id, rows = rows.len(), "dataset rows fetched");
        Ok(rows)
    }
}
