//! WebDriverAgent relay
//!
//! Fans one MJPEG screen stream out to any number of WebSocket viewers and
//! reverse-proxies every other request to the WebDriverAgent backend.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod metrics;
pub mod proxy;
pub mod session;
pub mod upstream;

#[cfg(test)]
mod test_helpers;

use crate::config::{RelayConfig, SessionConfig};
use crate::hub::{FanoutHub, HubOptions};
use crate::metrics::RelayMetrics;
use crate::proxy::ReverseProxy;
use crate::upstream::{HttpUpstream, UpstreamSource};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub hub: FanoutHub,
    pub proxy: ReverseProxy,
    pub session: SessionConfig,
    pub metrics: Arc<RelayMetrics>,
}

impl AppState {
    /// State wired to the real MJPEG source over HTTP.
    pub fn new(config: &RelayConfig) -> Result<Self, reqwest::Error> {
        let upstream = HttpUpstream::new(config.upstream.connect_timeout)?;
        Self::with_source(config, Arc::new(upstream))
    }

    pub fn with_source(
        config: &RelayConfig,
        source: Arc<dyn UpstreamSource>,
    ) -> Result<Self, reqwest::Error> {
        let metrics = Arc::new(RelayMetrics::new());
        let hub = FanoutHub::spawn(
            HubOptions::from_config(&config.upstream, &config.session),
            source,
            metrics.clone(),
        );
        Ok(Self {
            hub,
            proxy: ReverseProxy::new(&config.backend)?,
            session: config.session.clone(),
            metrics,
        })
    }
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/screen", get(handlers::screen_handler))
        .route("/about", get(handlers::about_handler))
        .route("/error", get(handlers::error_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .fallback(handlers::proxy_handler)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
