use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::AppState;

/// Fallback - everything that is not a relay route goes to the backend
pub async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    state.metrics.request_proxied();
    let method = req.method().clone();
    let uri = req.uri().clone();
    match state.proxy.forward(req).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!("Proxy {} {} failed: {}", method, uri, e);
            state.metrics.proxy_error();
            e.into_response()
        }
    }
}
