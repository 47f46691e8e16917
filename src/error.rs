use thiserror::Error;

/// Error type for cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The requested metric has no buffered backlog. Expected under concurrent `pop`/`drain`.
    #[error("Metric not found in cache: {0}")]
    KeyNotFound(String),

    #[error("Already initialized: {0}")]
    AlreadyInitialized(&'static str),

    #[error("Background task error: {0}")]
    BackgroundTaskError(String),

    #[error("Failed to install metrics recorder: {0}")]
    RecorderInstall(String),
}

impl CacheError {
    /// Returns true for the expected vanish race reported by `pop`.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, CacheError::KeyNotFound(_))
    }
}

/// Error returned by a [`crate::writer::BacklogSink`] implementation.
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;
