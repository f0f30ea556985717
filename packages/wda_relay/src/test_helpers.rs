use bytes::Bytes;
use futures::channel::mpsc as feed;
use futures::future::BoxFuture;
use futures::stream::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{ConnectError, StreamReadError};
use crate::hub::{FanoutHub, HubOptions, HubState, HubStatus};
use crate::metrics::RelayMetrics;
use crate::upstream::{ChunkStream, UpstreamSource};

/// Sender side of a scripted upstream body.
pub type Feed = feed::UnboundedSender<Result<Bytes, StreamReadError>>;

pub enum Script {
    Stream(ChunkStream),
    Fail,
    Hang,
}

/// In-memory `UpstreamSource` that plays back one scripted step per `open`.
/// An exhausted script fails the open.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
}

impl ScriptedSource {
    pub fn push(&self, step: Script) {
        self.script.lock().unwrap().push_back(step);
    }

    /// Queue a successful open and return the sender that feeds it
    pub fn push_stream(&self) -> Feed {
        let (tx, rx) = feed::unbounded();
        self.push(Script::Stream(rx.boxed()));
        tx
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl UpstreamSource for ScriptedSource {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<ChunkStream, ConnectError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        let url = url.to_string();
        Box::pin(async move {
            match step {
                Some(Script::Stream(chunks)) => Ok(chunks),
                Some(Script::Hang) => std::future::pending().await,
                Some(Script::Fail) | None => Err(ConnectError::BadStatus {
                    url,
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                }),
            }
        })
    }
}

pub fn scripted_hub(
    source: Arc<ScriptedSource>,
    retry_delay: Option<Duration>,
    buffer_chunks: usize,
    metrics: Arc<RelayMetrics>,
) -> FanoutHub {
    FanoutHub::spawn(
        HubOptions {
            mjpeg_url: "http://camera.test/stream".into(),
            retry_delay,
            buffer_chunks,
        },
        source,
        metrics,
    )
}

/// upstream alive ⇔ subscribers present (a waiting hub has subscribers and no upstream)
pub fn assert_invariant(status: &HubStatus) {
    if status.subscribers == 0 {
        assert_eq!(status.state, HubState::Idle, "empty hub must be idle");
    }
    if status.upstream_active() {
        assert!(status.subscribers > 0, "upstream alive with no subscribers");
    }
}

/// Poll the hub until it reports `state`, checking the invariant on every step.
pub async fn wait_for(hub: &FanoutHub, state: HubState) -> HubStatus {
    for _ in 0..200 {
        let status = hub.status().await.unwrap();
        assert_invariant(&status);
        if status.state == state {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("hub never reached {:?}", state);
}

pub fn send(feed: &Feed, chunk: &'static str) {
    feed.unbounded_send(Ok(Bytes::from_static(chunk.as_bytes())))
        .unwrap();
}
