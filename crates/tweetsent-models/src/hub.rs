//! Shared HTTP plumbing for the Hub clients.

use crate::error::{HubError, HubResult};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tweetsent_training::RegistryCredential;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_DATASETS_SERVER: &str = "https://datasets-server.huggingface.co";

/// Base URLs for the Hub API and the datasets server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubEndpoints {
    pub endpoint: String,
    pub datasets_server: String,
}

impl Default for HubEndpoints {
    fn default() -> Self {
        Self { endpoint: DEFAULT_ENDPOINT.to_string(), datasets_server: DEFAULT_DATASETS_SERVER.to_string() }
    }
}

impl HubEndpoints {
    /// Defaults, with `HF_ENDPOINT` overriding the API base when set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut endpoints = Self::default();
        if let Ok(endpoint) = std::env::var("HF_ENDPOINT")
            && !endpoint.trim().is_empty()
        {
            endpoints.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        endpoints
    }

    /// Point both bases at one server; used against local mocks.
    #[must_use]
    pub fn single(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/').to_string();
        Self { endpoint: base.clone(), datasets_server: base }
    }
}

#[derive(Debug, Clone)]
pub struct HubClient {
    client: Client,
    endpoints: HubEndpoints,
    credential: Option<RegistryCredential>,
}

impl HubClient {
    #[must_use]
    pub fn new(endpoints: HubEndpoints, credential: Option<RegistryCredential>) -> Self {
        Self { client: Client::new(), endpoints, credential }
    }

    #[must_use]
    pub fn endpoints(&self) -> &HubEndpoints {
        &self.endpoints
    }

    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.get(url))
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.authorize(self.client.post(url))
    }

    /// Unauthenticated PUT; LFS upload URLs are pre-signed.
    pub(crate) fn put(&self, url: &str) -> RequestBuilder {
        self.client.put(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credential {
            Some(credential) => request.bearer_auth(credential.expose()),
            None => request,
        }
    }

    /// Send and fail on a non-success status.
    pub(crate) async fn send(&self, url: &str, request: RequestBuilder) -> HubResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|source| HubError::Request { url: url.to_string(), source })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(%url, status = status.as_u16(), "hub request rejected");
        Err(HubError::Status { url: url.to_string(), status: status.as_u16(), body })
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(&self, url: &str, request: RequestBuilder) -> HubResult<T> {
        let response = self.send(url, request).await?;
        response.json::<T>().await.map_err(|source| HubError::Request { url: url.to_string(), source })
    }
}
