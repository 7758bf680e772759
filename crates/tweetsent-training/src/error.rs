use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TrainingError {
    /// Whether the error happened after the local artifact was persisted.
    #[must_use]
    pub fn is_publish(&self) -> bool {
        matches!(self, Self::Publish(_))
    }
}
