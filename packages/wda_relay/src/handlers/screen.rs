use axum::{
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::StreamExt;
use tracing::{debug, error};

use crate::AppState;
use crate::session::run_session;

/// Screen stream endpoint - upgrades to a binary WebSocket carrying MJPEG chunks
pub async fn screen_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_screen(socket, state))
}

async fn serve_screen(socket: WebSocket, state: AppState) {
    state.metrics.session_opened();

    match state.hub.subscribe().await {
        Ok(subscription) => {
            let (sink, stream) = socket.split();
            let end = run_session(
                sink,
                stream,
                subscription,
                state.session.write_timeout,
                state.metrics.clone(),
            )
            .await;
            debug!("Screen WebSocket closed ({:?})", end);
        }
        Err(e) => error!("Cannot attach screen WebSocket: {}", e),
    }

    state.metrics.session_closed();
}
