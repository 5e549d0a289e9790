//! Error types for credential custody and refresh

/// Errors from storage and the refresh exchange.
///
/// None of these reach callers of `TokenLifecycleManager::get_valid_token()`;
/// the facade logs them and reports `None`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("refresh request failed: {0}")]
    NetworkFailure(String),

    #[error("refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::StorageUnavailable(_) => "storage",
            Error::NetworkFailure(_) => "network",
            Error::RefreshRejected(_) => "rejected",
            Error::MalformedResponse(_) => "malformed",
            Error::Config(_) => "config",
        }
    }
}

/// Result alias for token lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;
