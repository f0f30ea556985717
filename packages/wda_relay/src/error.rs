use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// Failure to open the MJPEG upstream.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid upstream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("upstream {url} is unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {url} answered with status {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("upstream open task failed: {0}")]
    TaskFailed(String),
}

impl ConnectError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_builder() {
            Self::InvalidUrl {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            Self::Unreachable {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// The upstream connection dropped after it was established.
#[derive(Debug, thiserror::Error)]
#[error("upstream stream interrupted: {0}")]
pub struct StreamReadError(pub String);

impl From<reqwest::Error> for StreamReadError {
    fn from(err: reqwest::Error) -> Self {
        Self(err.to_string())
    }
}

/// A subscriber's socket could not accept a chunk.
#[derive(Debug, thiserror::Error)]
pub enum ClientWriteError {
    #[error("client send failed: {0}")]
    Send(String),

    #[error("client write timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// The fan-out hub actor is no longer running.
#[derive(Debug, thiserror::Error)]
#[error("fan-out hub has shut down")]
pub struct HubClosed;

/// Invalid startup configuration. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is not a valid http(s) url ({value}): {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field} must be a port between 1 and 65535")]
    InvalidPort { field: &'static str },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} is too large")]
    TooLarge { field: &'static str },

    #[error("config file {} does not exist", path.display())]
    MissingFile { path: std::path::PathBuf },

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}

/// Errors surfaced by the reverse proxy and informational handlers.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("backend unavailable: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("{0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Backend(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Backend(_) => StatusCode::BAD_GATEWAY,
            ProxyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
