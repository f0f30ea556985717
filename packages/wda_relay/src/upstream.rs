//! MJPEG upstream connection
//!
//! The hub never looks inside the byte stream: chunks are forwarded exactly as
//! the HTTP body delivers them, without reframing on JPEG boundaries.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConnectError, StreamReadError};

/// Lazy, non-restartable sequence of raw chunks from one upstream connection.
pub type ChunkStream = BoxStream<'static, Result<Bytes, StreamReadError>>;

/// Something that can open the MJPEG source.
pub trait UpstreamSource: Send + Sync + 'static {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ChunkStream, ConnectError>>;
}

/// Opens the MJPEG source over HTTP with a shared reqwest client.
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        // No overall timeout: the body is an endless stream
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl UpstreamSource for HttpUpstream {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ChunkStream, ConnectError>> {
        let client = self.client.clone();
        let url = url.to_string();
        Box::pin(async move {
            debug!("Opening MJPEG upstream {}", url);
            let resp = client
                .get(&url)
                .send()
                .await
                .map_err(|e| ConnectError::from_reqwest(&url, e))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ConnectError::BadStatus { url, status });
            }

            let chunks = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(StreamReadError::from))
                .boxed();
            Ok(chunks)
        })
    }
}

/// Exclusive owner of one open upstream connection.
///
/// Dropping or closing it releases the HTTP connection. After `close` no
/// further chunk is yielded even if the peer had more buffered.
pub struct UpstreamFetcher {
    chunks: Option<ChunkStream>,
}

impl UpstreamFetcher {
    pub async fn open(source: &dyn UpstreamSource, url: &str) -> Result<Self, ConnectError> {
        let chunks = source.open(url).await?;
        Ok(Self::from_stream(chunks))
    }

    pub fn from_stream(chunks: ChunkStream) -> Self {
        Self {
            chunks: Some(chunks),
        }
    }

    /// Next chunk, or `None` once the stream ended or the fetcher was closed.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, StreamReadError>> {
        let chunks = self.chunks.as_mut()?;
        let next = chunks.next().await;
        if !matches!(next, Some(Ok(_))) {
            // end of sequence, successful or not
            self.chunks = None;
        }
        next
    }

    pub fn close(&mut self) {
        self.chunks = None;
    }

    pub fn is_closed(&self) -> bool {
        self.chunks.is_none()
    }
}
