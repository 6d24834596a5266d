use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /* mapped errors */
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    SerdeYaml(#[from] serde_yml::Error),

    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    #[error(transparent)]
    TungsteniteError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    ConfigError(#[from] config::ConfigError),

    #[error(transparent)]
    SetLoggerError(#[from] log::SetLoggerError),

    #[error(transparent)]
    JoinError(#[from] tokio::task::JoinError),

    /* transport */
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP {status} during {action}{}", body_suffix(.body))]
    HttpStatus {
        action: String,
        status: reqwest::StatusCode,
        body: String,
    },

    /* backend */
    #[error("Backend reported failure: {0}")]
    Backend(String),

    /* commands */
    #[error("Entity {0} is read-only")]
    ReadOnlyEntity(String),

    #[error("Entity {0} is not tracked")]
    UnknownEntity(String),

    #[error("No command route for {0}")]
    NoCommandRoute(String),

    #[error("All {0} command strategies failed")]
    CommandFailed(usize),

    #[error("Service error: {0}")]
    ServiceError(String),
}

impl ApiError {
    #[must_use]
    pub fn service_error(msg: impl Into<String>) -> Self {
        Self::ServiceError(msg.into())
    }

    /// Failure below the HTTP layer: refused connection, DNS, TLS, timeout.
    #[must_use]
    pub fn is_network(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Cancelled | Self::IOError(_) => true,
            Self::ReqwestError(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            _ => false,
        }
    }
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {body}")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
