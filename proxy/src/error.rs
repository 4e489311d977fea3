use crate::auth::AuthError;
use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),

    #[error("Connection limit reached for user: {0}")]
    ConnectionLimitExceeded(String),

    #[error("Data limit reached for user: {0}")]
    QuotaExceeded(String),

    #[error("Time limit exceeded reaching {0}")]
    Timeout(String),

    #[error("Could not reach {0}")]
    UpstreamUnreachable(String),

    #[error("Failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection hijacking not supported")]
    HijackUnsupported,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProxyError {
    /// Status code reported to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Authentication(_) => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            ProxyError::ConnectionLimitExceeded(_) | ProxyError::QuotaExceeded(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ProxyError::Timeout(_) | ProxyError::Dial { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::HijackUnsupported
            | ProxyError::Io(_)
            | ProxyError::Http(_)
            | ProxyError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
