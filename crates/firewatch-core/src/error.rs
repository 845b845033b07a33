use thiserror::Error;

/// Failure reported by a document backend for a read or write.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend refused the request (permissions, validation, quota).
    #[error("backend rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("backend connection closed")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed backend payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BackendError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}
