use crate::error::TrainingResult;
use async_trait::async_trait;
use std::path::PathBuf;

/// Bearer token for registry writes.
///
/// Only ever read from the environment; `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredential(String);

impl RegistryCredential {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self(token)
    }

    /// Read the token from `var`, ignoring empty values.
    #[must_use]
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Self)
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RegistryCredential(***)")
    }
}

/// A request to upload a saved artifact directory.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub repo_id: String,
    pub revision: String,
    pub local_dir: PathBuf,
    /// Files to upload, relative to `local_dir`.
    pub files: Vec<PathBuf>,
    pub commit_message: String,
    pub private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub repo_url: String,
    pub commit_oid: Option<String>,
}

/// A remote store for trained artifacts.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    fn id(&self) -> &'static str;

    async fn publish(&self, request: &PublishRequest) -> TrainingResult<PublishReceipt>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = RegistryCredential::new("hf_secret_value".to_string());
        let printed = format!("{cred:?}");
        assert!(!printed.contains("hf_secret_value"));
        assert_eq!(cred.expose(), "hf_secret_value");
    }

    #[test]
    fn test_missing_env_yields_none() {
        assert!(RegistryCredential::from_env("TWEETSENT_TEST_TOKEN_THAT_IS_NEVER_SET").is_none());
    }
}
