use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    AlreadyExists(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("stale update for {0}: last_activity_at went backwards")]
    StaleUpdate(String),
    #[error("failed to (de)serialize record: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Custom(String),
}
