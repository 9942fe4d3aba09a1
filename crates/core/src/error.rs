use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanlightError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Analysis backend error: {0}")]
    Backend(String),
    #[error("File exclusion filter error: {0}")]
    Filter(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ScanlightError>;
