use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ClientWriteError;
use crate::hub::Subscription;
use crate::metrics::RelayMetrics;

/// Why a screen session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The client closed the socket or its read side failed
    ClientClosed,
    /// A write failed or did not finish in time
    WriteFailed,
    /// The hub shut down underneath us
    HubClosed,
}

/// Bridge one client connection to the hub until either side goes away.
///
/// Chunks are written in arrival order, each bounded by `write_timeout`.
/// Anything the client sends is ignored apart from close. The subscription is
/// released exactly once on every exit path.
pub async fn run_session<S, R, E>(
    mut sink: S,
    mut incoming: R,
    mut subscription: Subscription,
    write_timeout: Duration,
    metrics: Arc<RelayMetrics>,
) -> SessionEnd
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let id = subscription.id();
    debug!("Screen session {} started", id);

    let end = loop {
        tokio::select! {
            chunk = subscription.recv() => match chunk {
                Some(chunk) => {
                    if let Err(e) = write_chunk(&mut sink, chunk, write_timeout).await {
                        warn!("Screen session {}: {}", id, e);
                        metrics.client_write_error();
                        break SessionEnd::WriteFailed;
                    }
                }
                None => {
                    let _ = tokio::time::timeout(write_timeout, sink.send(Message::Close(None))).await;
                    break SessionEnd::HubClosed;
                }
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break SessionEnd::ClientClosed,
                Some(Err(e)) => {
                    debug!("Screen session {} read error: {}", id, e);
                    break SessionEnd::ClientClosed;
                }
                Some(Ok(_)) => {}
            },
        }
    };

    subscription.unsubscribe();
    debug!("Screen session {} ended: {:?}", id, end);
    end
}

async fn write_chunk<S>(
    sink: &mut S,
    chunk: bytes::Bytes,
    write_timeout: Duration,
) -> Result<(), ClientWriteError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(write_timeout, sink.send(Message::Binary(chunk))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ClientWriteError::Send(e.to_string())),
        Err(_) => Err(ClientWriteError::Timeout(write_timeout)),
    }
}
