//! Shared MJPEG fan-out
//!
//! One actor task owns the subscriber map and the upstream connection, so
//! subscribe, unsubscribe and chunk arrival are applied strictly one at a time.
//!
//! ```text
//!   FanoutHub (handle, Clone) ──commands──►  HubActor
//!                                            ├─ subscribers: id → mpsc::Sender<Bytes>
//!                                            └─ upstream: Idle | Connecting | Streaming | Disconnected
//!                                                    │
//!   UpstreamSource::open ──► ChunkStream ────────────┘──try_send──► Subscription::recv
//! ```
//!
//! The upstream is opened when the subscriber count goes 0→1 and dropped when
//! it goes back to 0, including while the open is still in flight.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::config::{SessionConfig, UpstreamConfig};
use crate::error::{ConnectError, HubClosed, StreamReadError};
use crate::metrics::RelayMetrics;
use crate::upstream::{UpstreamFetcher, UpstreamSource};

pub type SubscriberId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HubState {
    /// No subscribers, no upstream
    Idle,
    /// Upstream open in flight
    Connecting,
    /// Upstream open, chunks flowing
    Streaming,
    /// Subscribers waiting, upstream failed or ended
    Disconnected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStatus {
    pub state: HubState,
    pub subscribers: usize,
    /// Open attempts over the hub's lifetime
    pub upstream_opens: u64,
}

impl HubStatus {
    /// Whether an upstream connection (open or opening) currently exists
    pub fn upstream_active(&self) -> bool {
        matches!(self.state, HubState::Connecting | HubState::Streaming)
    }
}

#[derive(Clone, Debug)]
pub struct HubOptions {
    pub mjpeg_url: String,
    pub retry_delay: Option<Duration>,
    pub buffer_chunks: usize,
}

impl HubOptions {
    pub fn from_config(upstream: &UpstreamConfig, session: &SessionConfig) -> Self {
        Self {
            mjpeg_url: upstream.mjpeg_url.clone(),
            retry_delay: upstream.retry_delay,
            buffer_chunks: session.buffer_chunks,
        }
    }
}

enum HubCommand {
    Subscribe {
        respond_to: oneshot::Sender<(SubscriberId, mpsc::Receiver<Bytes>)>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },
}

/// Handle to the fan-out actor. Cheap to clone.
#[derive(Clone)]
pub struct FanoutHub {
    sender: mpsc::UnboundedSender<HubCommand>,
}

impl FanoutHub {
    /// Spawn the actor on the current tokio runtime.
    pub fn spawn(
        options: HubOptions,
        source: Arc<dyn UpstreamSource>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let (sender, commands) = mpsc::unbounded_channel();
        let actor = HubActor {
            url: options.mjpeg_url,
            retry_delay: options.retry_delay,
            buffer_chunks: options.buffer_chunks.max(1),
            source,
            metrics,
            subscribers: HashMap::new(),
            next_id: 1,
            upstream: UpstreamSlot::Idle,
            upstream_opens: 0,
            commands,
        };
        tokio::spawn(actor.run());
        Self { sender }
    }

    pub async fn subscribe(&self) -> Result<Subscription, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::Subscribe { respond_to: tx })
            .map_err(|_| HubClosed)?;
        let (id, chunks) = rx.await.map_err(|_| HubClosed)?;
        Ok(Subscription {
            id,
            chunks,
            hub: self.clone(),
            released: false,
        })
    }

    /// Remove a subscriber. Unknown or already-removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.sender.send(HubCommand::Unsubscribe { id });
    }

    pub async fn status(&self) -> Result<HubStatus, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::GetStatus { respond_to: tx })
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }
}

/// A registered consumer. Unsubscribes exactly once, explicitly or on drop.
pub struct Subscription {
    id: SubscriberId,
    chunks: mpsc::Receiver<Bytes>,
    hub: FanoutHub,
    released: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next broadcast chunk. `None` after unsubscribe or hub shutdown.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.chunks.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.hub.unsubscribe(self.id);
        // Nothing queued before the removal is handed out afterwards
        self.chunks.close();
        while self.chunks.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

enum UpstreamSlot {
    Idle,
    Connecting(JoinHandle<Result<UpstreamFetcher, ConnectError>>),
    Streaming(UpstreamFetcher),
    Disconnected { retry: Option<Pin<Box<Sleep>>> },
}

enum UpstreamEvent {
    Opened(Result<UpstreamFetcher, ConnectError>),
    Chunk(Bytes),
    Ended(Option<StreamReadError>),
    RetryDue,
}

impl UpstreamSlot {
    fn state(&self) -> HubState {
        match self {
            UpstreamSlot::Idle => HubState::Idle,
            UpstreamSlot::Connecting(_) => HubState::Connecting,
            UpstreamSlot::Streaming(_) => HubState::Streaming,
            UpstreamSlot::Disconnected { .. } => HubState::Disconnected,
        }
    }

    /// Wait for whatever the current slot can produce. Cancel-safe.
    async fn next_event(&mut self) -> UpstreamEvent {
        match self {
            UpstreamSlot::Connecting(task) => match task.await {
                Ok(result) => UpstreamEvent::Opened(result),
                Err(e) => UpstreamEvent::Opened(Err(ConnectError::TaskFailed(e.to_string()))),
            },
            UpstreamSlot::Streaming(fetcher) => match fetcher.next_chunk().await {
                Some(Ok(chunk)) => UpstreamEvent::Chunk(chunk),
                Some(Err(e)) => UpstreamEvent::Ended(Some(e)),
                None => UpstreamEvent::Ended(None),
            },
            UpstreamSlot::Disconnected { retry: Some(sleep) } => {
                sleep.as_mut().await;
                UpstreamEvent::RetryDue
            }
            UpstreamSlot::Idle | UpstreamSlot::Disconnected { retry: None } => {
                std::future::pending().await
            }
        }
    }
}

enum HubEvent {
    Command(HubCommand),
    Upstream(UpstreamEvent),
}

struct HubActor {
    url: String,
    retry_delay: Option<Duration>,
    buffer_chunks: usize,
    source: Arc<dyn UpstreamSource>,
    metrics: Arc<RelayMetrics>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Bytes>>,
    next_id: SubscriberId,
    upstream: UpstreamSlot,
    upstream_opens: u64,
    commands: mpsc::UnboundedReceiver<HubCommand>,
}

impl HubActor {
    async fn run(mut self) {
        debug!("Fan-out hub started for {}", self.url);

        loop {
            // Commands first: a removal queued before a chunk is applied before it
            let event = tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => HubEvent::Command(cmd),
                    None => break,
                },
                ev = self.upstream.next_event() => HubEvent::Upstream(ev),
            };

            match event {
                HubEvent::Command(cmd) => self.handle_command(cmd),
                HubEvent::Upstream(ev) => self.handle_upstream(ev),
            }
        }

        self.release_upstream();
        debug!("Fan-out hub for {} shut down", self.url);
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Subscribe { respond_to } => {
                let id = self.next_id;
                self.next_id += 1;
                let (tx, rx) = mpsc::channel(self.buffer_chunks);
                self.subscribers.insert(id, tx);
                debug!(
                    "Subscriber {} joined ({} total)",
                    id,
                    self.subscribers.len()
                );

                if self.subscribers.len() == 1 {
                    self.open_upstream();
                }

                if respond_to.send((id, rx)).is_err() {
                    // Caller went away before it got its handle
                    self.remove_subscriber(id);
                }
            }
            HubCommand::Unsubscribe { id } => self.remove_subscriber(id),
            HubCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(HubStatus {
                    state: self.upstream.state(),
                    subscribers: self.subscribers.len(),
                    upstream_opens: self.upstream_opens,
                });
            }
        }
    }

    fn handle_upstream(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Opened(Ok(fetcher)) => {
                info!(
                    "MJPEG upstream {} connected, streaming to {} subscriber(s)",
                    self.url,
                    self.subscribers.len()
                );
                self.upstream = UpstreamSlot::Streaming(fetcher);
            }
            UpstreamEvent::Opened(Err(e)) => {
                warn!("Failed to open MJPEG upstream: {}", e);
                self.metrics.upstream_failed();
                self.mark_disconnected();
            }
            UpstreamEvent::Chunk(chunk) => self.broadcast(chunk),
            UpstreamEvent::Ended(Some(e)) => {
                warn!("MJPEG upstream {} dropped: {}", self.url, e);
                self.metrics.upstream_failed();
                self.mark_disconnected();
            }
            UpstreamEvent::Ended(None) => {
                info!("MJPEG upstream {} closed by peer", self.url);
                self.metrics.upstream_closed();
                self.mark_disconnected();
            }
            UpstreamEvent::RetryDue => {
                info!("Retrying MJPEG upstream {}", self.url);
                self.open_upstream();
            }
        }
    }

    fn broadcast(&mut self, chunk: Bytes) {
        self.metrics.chunk_received();
        let mut delivered = 0;
        let mut dropped = 0;
        for (id, tx) in &self.subscribers {
            match tx.try_send(chunk.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Subscriber {} is behind, dropping chunk", id);
                    dropped += 1;
                }
                // Session is closing; it removes itself
                Err(mpsc::error::TrySendError::Closed(_)) => dropped += 1,
            }
        }
        self.metrics.chunks_fanned_out(delivered, dropped);
    }

    fn open_upstream(&mut self) {
        self.upstream_opens += 1;
        self.metrics.upstream_opened();
        info!("Opening MJPEG upstream {}", self.url);
        let source = self.source.clone();
        let url = self.url.clone();
        let task =
            tokio::spawn(async move { UpstreamFetcher::open(source.as_ref(), &url).await });
        self.upstream = UpstreamSlot::Connecting(task);
    }

    fn mark_disconnected(&mut self) {
        let retry = self.retry_delay.map(|delay| Box::pin(tokio::time::sleep(delay)));
        if retry.is_none() {
            info!(
                "Upstream unavailable; {} subscriber(s) waiting for the next first subscriber",
                self.subscribers.len()
            );
        }
        self.upstream = UpstreamSlot::Disconnected { retry };
    }

    fn remove_subscriber(&mut self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_none() {
            return;
        }
        debug!(
            "Subscriber {} left ({} remaining)",
            id,
            self.subscribers.len()
        );
        if self.subscribers.is_empty() {
            self.release_upstream();
        }
    }

    fn release_upstream(&mut self) {
        match std::mem::replace(&mut self.upstream, UpstreamSlot::Idle) {
            UpstreamSlot::Idle => {}
            UpstreamSlot::Connecting(task) => {
                info!("Last subscriber left, aborting upstream open");
                task.abort();
            }
            UpstreamSlot::Streaming(mut fetcher) => {
                info!("Last subscriber left, closing MJPEG upstream {}", self.url);
                fetcher.close();
            }
            UpstreamSlot::Disconnected { .. } => {
                debug!("Last subscriber left while upstream was down");
            }
        }
    }
}
