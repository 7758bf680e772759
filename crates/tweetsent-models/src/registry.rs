//! Publishing a saved model directory to the Hub.
//!
//! Publishing is two calls: create the repo (a 409 means it already exists),
//! then one NDJSON commit carrying every file. A repo id without a namespace
//! is resolved against the token owner first, since the commit and LFS
//! routes need the full `namespace/name`. Small files travel inline as
//! base64; files above [`LFS_THRESHOLD`] are uploaded through the Git LFS
//! batch API first and referenced by their sha256.

use crate::error::{HubError, HubResult};
use crate::hub::HubClient;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::path::Path;
use tweetsent_training::{ModelRegistry, PublishReceipt, PublishRequest, TrainingError, TrainingResult};

/// Files larger than this go through LFS.
pub const LFS_THRESHOLD: u64 = 10 * 1024 * 1024;

#[derive(Debug, Serialize)]
struct CreateRepoBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<&'a str>,
    private: bool,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    commit_url: Option<String>,
    #[serde(default)]
    commit_oid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Debug, Deserialize)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    #[serde(default)]
    upload: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: std::collections::HashMap<String, String>,
}

/// A file read from disk, ready to commit.
struct StagedFile {
    path: String,
    bytes: Vec<u8>,
    oid: String,
}

impl StagedFile {
    fn read(root: &Path, relative: &Path) -> HubResult<Self> {
        let bytes = std::fs::read(root.join(relative))?;
        let oid = hex::encode(Sha256::digest(&bytes));
        // Repo paths always use forward slashes.
        let path = relative.components().map(|c| c.as_os_str().to_string_lossy()).collect::<Vec<_>>().join("/");
        Ok(Self { path, bytes, oid })
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn is_lfs(&self) -> bool {
        self.size() > LFS_THRESHOLD
    }

    fn commit_line(&self) -> Value {
        if self.is_lfs() {
            json!({"key": "lfsFile", "value": {"path": self.path, "algo": "sha256", "oid": self.oid, "size": self.size()}})
        } else {
            json!({"key": "file", "value": {"content": STANDARD.encode(&self.bytes), "path": self.path, "encoding": "base64"}})
        }
    }
}

pub struct HubRegistry {
    client: HubClient,
}

impl HubRegistry {
    #[must_use]
    pub fn new(client: HubClient) -> Self {
        Self { client }
    }

    fn repo_url(&self, repo_id: &str) -> String {
        format!("{}/{}", self.client.endpoints().endpoint, repo_id)
    }

    /// `name` becomes `<token owner>/name`; qualified ids pass through.
    async fn qualify_repo_id(&self, repo_id: &str) -> HubResult<String> {
        if repo_id.contains('/') {
            return Ok(repo_id.to_string());
        }
        let url = format!("{}/api/whoami-v2", self.client.endpoints().endpoint);
        let whoami: WhoAmI = self.client.send_json(&url, self.client.get(&url)).await?;
        tracing::debug!(namespace = %whoami.name, repo_id, "resolved repo namespace");
        Ok(format!("{}/{repo_id}", whoami.name))
    }

    /// `organization` is omitted for repos in the token owner's namespace.
    async fn create_repo(&self, repo_id: &str, organization: Option<&str>, private: bool) -> HubResult<()> {
        let name = repo_id.rsplit_once('/').map_or(repo_id, |(_, name)| name);
        let url = format!("{}/api/repos/create", self.client.endpoints().endpoint);
        let body = CreateRepoBody { kind: "model", name, organization, private };

        match self.client.send(&url, self.client.post(&url).json(&body)).await {
            Ok(_) => {
                tracing::info!(repo_id, "created model repo");
                Ok(())
            }
            Err(e) if e.status() == Some(409) => {
                tracing::debug!(repo_id, "model repo already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn upload_lfs(&self, repo_id: &str, revision: &str, files: &[&StagedFile]) -> HubResult<()> {
        if files.is_empty() {
            return Ok(());
        }
        let url = format!("{}/{}.git/info/lfs/objects/batch", self.client.endpoints().endpoint, repo_id);
        let body = json!({
            "operation": "upload",
            "transfers": ["basic"],
            "ref": {"name": format!("refs/heads/{revision}")},
            "objects": files.iter().map(|f| json!({"oid": f.oid, "size": f.size()})).collect::<Vec<_>>(),
            "hash_algo": "sha256",
        });
        let request = self
            .client
            .post(&url)
            .header("accept", "application/vnd.git-lfs+json")
            .header("content-type", "application/vnd.git-lfs+json")
            .body(body.to_string());
        let batch: LfsBatchResponse = self.client.send_json(&url, request).await?;

        for object in batch.objects {
            if let Some(error) = object.error {
                return Err(HubError::Upload(format!("lfs rejected {}: {error}", object.oid)));
            }
            // No upload action means the server already has the object.
            let Some(upload) = object.actions.and_then(|a| a.upload) else {
                continue;
            };
            let file = files
                .iter()
                .find(|f| f.oid == object.oid)
                .ok_or_else(|| HubError::Upload(format!("lfs returned unknown oid {}", object.oid)))?;

            let mut request = self.client.put(&upload.href).body(file.bytes.clone());
            for (name, value) in &upload.header {
                request = request.header(name, value);
            }
            self.client.send(&upload.href, request).await?;
            tracing::debug!(path = %file.path, size = file.size(), "uploaded lfs object");
        }
        Ok(())
    }

    async fn commit(&self, repo_id: &str, request: &PublishRequest, files: &[StagedFile]) -> HubResult<CommitResponse> {
        let url = format!("{}/api/models/{}/commit/{}", self.client.endpoints().endpoint, repo_id, request.revision);
        let mut body = json!({"key": "header", "value": {"summary": request.commit_message, "description": ""}})
            .to_string();
        for file in files {
            body.push('\n');
            body.push_str(&file.commit_line().to_string());
        }
        let http = self.client.post(&url).header("content-type", "application/x-ndjson").body(body);
        self.client.send_json(&url, http).await
    }

    async fn publish_inner(&self, request: &PublishRequest) -> HubResult<PublishReceipt> {
        let files = request
            .files
            .iter()
            .map(|relative| StagedFile::read(&request.local_dir, relative))
            .collect::<HubResult<Vec<_>>>()?;

        let repo_id = self.qualify_repo_id(&request.repo_id).await?;
        let organization = request.repo_id.split_once('/').map(|(org, _)| org);
        self.create_repo(&repo_id, organization, request.private).await?;
        let lfs: Vec<&StagedFile> = files.iter().filter(|f| f.is_lfs()).collect();
        self.upload_lfs(&repo_id, &request.revision, &lfs).await?;
        let commit = self.commit(&repo_id, request, &files).await?;

        tracing::info!(
            repo_id = %repo_id,
            files = files.len(),
            lfs_files = lfs.len(),
            commit = commit.commit_url.as_deref().unwrap_or("-"),
            "published model"
        );
        Ok(PublishReceipt { repo_url: self.repo_url(&repo_id), commit_oid: commit.commit_oid })
    }
}

#[async_trait]
impl ModelRegistry for HubRegistry {
    fn id(&self) -> &'static str {
        "hub"
    }

    async fn publish(&self, request: &PublishRequest) -> TrainingResult<PublishReceipt> {
        if !self.client.has_credential() {
            return Err(TrainingError::Publish("no registry credential configured".to_string()));
        }
        self.publish_inner(request).await.map_err(HubError::into_publish)
    }
}
