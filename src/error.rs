/// Error types for the media subsystem
///
/// Only `BackendUnconfigured` and `PreconditionFailed` may abort a whole sync.
/// Everything else is collected per item into the batch result's `errors`.
use thiserror::Error;

/// Main error type for the media subsystem
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("invalid asset filename: {0:?}")]
    InvalidFilename(String),

    #[error("no remote backend configured")]
    BackendUnconfigured,

    #[error("{0}")]
    PreconditionFailed(String),

    #[error("transfer failed for {filename}: {message}")]
    Transfer { filename: String, message: String },

    #[error("thumbnail derivation failed: {0}")]
    Derivation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("sync already in progress")]
    SyncInProgress,
}

impl MediaError {
    /// True when the error means "the thing is not there", whatever layer said so.
    /// Deletes treat this as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            MediaError::NotFound(_) => true,
            MediaError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            MediaError::Http(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            MediaError::ObjectStore(object_store::Error::NotFound { .. }) => true,
            _ => false,
        }
    }

    pub fn transfer(filename: impl Into<String>, message: impl ToString) -> Self {
        MediaError::Transfer {
            filename: filename.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias for the media subsystem
pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(MediaError::NotFound("a.jpg".into()).is_not_found());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(MediaError::Io(io).is_not_found());
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(!MediaError::Io(denied).is_not_found());
        assert!(!MediaError::BackendUnconfigured.is_not_found());
    }

    #[test]
    fn test_transfer_message() {
        let err = MediaError::transfer("b.jpg", "connection reset");
        assert_eq!(err.to_string(), "transfer failed for b.jpg: connection reset");
    }
}
