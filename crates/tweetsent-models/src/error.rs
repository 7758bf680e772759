use thiserror::Error;
use tweetsent_training::TrainingError;

pub type HubResult<T> = std::result::Result<T, HubError>;

/// Failures talking to the Hub or reading downloaded model files.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    /// A model, file or repo that does not exist on the Hub or on disk.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("invalid weights: {0}")]
    Weights(String),

    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HubError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map into the training taxonomy as a publish failure.
    #[must_use]
    pub fn into_publish(self) -> TrainingError {
        TrainingError::Publish(self.to_string())
    }
}

impl From<HubError> for TrainingError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Tokenizer(msg) => Self::Tokenizer(msg),
            HubError::Weights(msg) => Self::Artifact(msg),
            HubError::Status { status: 404, ref url, .. } => Self::Config(format!("not found: {url}")),
            HubError::NotFound(what) => Self::Config(format!("not found: {what}")),
            HubError::Io(e) => Self::Io(e),
            HubError::Json(e) => Self::Json(e),
            other => Self::Backend(other.to_string()),
        }
    }
}
