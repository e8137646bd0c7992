use thiserror::Error;

/// Failures inside the Dropbox client. Most public operations report
/// `bool` / `Option` instead; `fetch_backup` hands them to the sync service.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization was cancelled")]
    Cancelled,

    #[error("Authorization timed out")]
    Timeout,

    #[error("Redirect did not contain an authorization code")]
    MissingCode,

    #[error("Not authenticated with Dropbox")]
    NotAuthenticated,

    #[error("Access token rejected")]
    Unauthorized,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Dropbox API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
