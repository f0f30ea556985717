//! Relay metrics for observability
//!
//! Lock-free counters shared by the hub, the screen sessions and the proxy.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::hub::HubStatus;

/// Relay-wide metrics
#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Session metrics
    /// Currently open screen WebSockets
    pub active_sessions: AtomicU64,
    /// Screen WebSockets accepted since start
    pub total_sessions: AtomicU64,
    /// Sessions closed because a write failed or timed out
    pub client_write_errors: AtomicU64,

    // Upstream metrics
    /// Open attempts against the MJPEG source
    pub upstream_opens: AtomicU64,
    /// Failed opens plus mid-stream read errors
    pub upstream_failures: AtomicU64,
    /// Streams the peer ended cleanly
    pub upstream_closes: AtomicU64,

    // Chunk metrics
    /// Chunks read from the upstream
    pub chunks_received: AtomicU64,
    /// Chunks queued to a subscriber
    pub chunks_delivered: AtomicU64,
    /// Chunks skipped for a subscriber whose queue was full or closed
    pub chunks_dropped: AtomicU64,

    // Proxy metrics
    pub proxied_requests: AtomicU64,
    pub proxy_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn client_write_error(&self) {
        self.client_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_opened(&self) {
        self.upstream_opens.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_failed(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_closed(&self) {
        self.upstream_closes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunks_fanned_out(&self, delivered: u64, dropped: u64) {
        self.chunks_delivered.fetch_add(delivered, Ordering::Relaxed);
        self.chunks_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn request_proxied(&self) {
        self.proxied_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn proxy_error(&self) {
        self.proxy_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            sessions: SessionMetrics {
                active: self.active_sessions.load(Ordering::Relaxed),
                total: self.total_sessions.load(Ordering::Relaxed),
                write_errors: self.client_write_errors.load(Ordering::Relaxed),
            },
            upstream: UpstreamMetrics {
                opens: self.upstream_opens.load(Ordering::Relaxed),
                failures: self.upstream_failures.load(Ordering::Relaxed),
                closes: self.upstream_closes.load(Ordering::Relaxed),
            },
            chunks: ChunkMetrics {
                received: self.chunks_received.load(Ordering::Relaxed),
                delivered: self.chunks_delivered.load(Ordering::Relaxed),
                dropped: self.chunks_dropped.load(Ordering::Relaxed),
            },
            proxy: ProxyMetrics {
                requests: self.proxied_requests.load(Ordering::Relaxed),
                errors: self.proxy_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub sessions: SessionMetrics,
    pub upstream: UpstreamMetrics,
    pub chunks: ChunkMetrics,
    pub proxy: ProxyMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub active: u64,
    pub total: u64,
    pub write_errors: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamMetrics {
    pub opens: u64,
    pub failures: u64,
    pub closes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetrics {
    pub received: u64,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyMetrics {
    pub requests: u64,
    pub errors: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub hub: HubStatus,
    pub sessions: u64,
    pub uptime_secs: u64,
}
