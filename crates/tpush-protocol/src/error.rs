use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("authentication rejected by {server}: HTTP {status}")]
    AuthRejected { server: String, status: u16 },

    #[error("invalid remote URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("TLS material error: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("unexpected HTTP {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProtocolError {
    fn from(err: reqwest::Error) -> Self {
        ProtocolError::Http(err.to_string())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
