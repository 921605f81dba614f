use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Build API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Missing build API token: set {0}")]
    MissingToken(String),

    #[error("Invalid build API response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

impl IngestError {
    /// Worth retrying: network failures, throttling and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            IngestError::Api { status, .. } => *status == 429 || *status >= 500,
            IngestError::MissingToken(_) | IngestError::InvalidResponse(_) => false,
        }
    }
}
