use crate::error::ProxyError;

/// Identifies the relay
pub async fn about_handler() -> String {
    format!("WDA relay {}", env!("CARGO_PKG_VERSION"))
}

/// Always fails; exercises the per-request error path
pub async fn error_handler() -> Result<&'static str, ProxyError> {
    Err(ProxyError::Internal("intentional failure".to_string()))
}
