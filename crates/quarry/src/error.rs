use reqwest::StatusCode;

// Custom error type for transport and resolution operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    UrlError(String),

    #[error("Could not {method} '{location}'. Received status code {status} from server: {reason}")]
    Status {
        method: &'static str,
        location: String,
        status: StatusCode,
        reason: String,
    },

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid usage: {0}")]
    Configuration(String),

    #[error("No resolver available: {0}")]
    NoResolver(String),

    #[error("Could not resolve artifact. Attempted: [{}]. Last failure: {reason}", attempts.join(", "))]
    ResolutionFailed {
        attempts: Vec<String>,
        reason: String,
    },
}

impl TransportError {
    /// Build a `Status` error from a response that was neither 2xx, 404 nor 304.
    pub(crate) fn status(method: &'static str, location: &str, status: StatusCode) -> Self {
        Self::Status {
            method,
            location: location.to_string(),
            status,
            reason: status
                .canonical_reason()
                .unwrap_or("unknown reason")
                .to_string(),
        }
    }
}
