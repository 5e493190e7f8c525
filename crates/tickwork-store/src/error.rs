use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Empty segments, leading/trailing slashes, or an empty path.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
