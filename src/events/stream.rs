//! Long-lived subscription to a workspace's event stream.
//!
//! A background task obtains a client id, opens the stream, announces the
//! client and then feeds every decoded event into a channel. Pings only
//! mark the connection alive and unknown subjects are dropped, so the
//! receiver sees workspace and compiler events only.
//!
//! When the stream ends or fails at the transport level it is reopened with a
//! fresh client id according to the [`ReconnectPolicy`]. Undecodable messages
//! end the subscription immediately.

use super::{classify, Event, FrameCodec};
use crate::api::WorkspaceApi;
use crate::config::ReconnectPolicy;
use crate::error::{FailureClass, Result, SyncError};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Receiving end of a running subscription. Dropping it stops the task.
pub struct EventSubscription {
    events: mpsc::Receiver<Result<Event>>,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Start listening on workspace `workspace_id` until `shutdown` fires.
    pub fn spawn<A>(
        api: Arc<A>,
        workspace_id: impl Into<String>,
        policy: ReconnectPolicy,
        shutdown: CancellationToken,
    ) -> Self
    where
        A: WorkspaceApi + ?Sized,
    {
        let (tx, events) = mpsc::channel(CHANNEL_CAPACITY);
        let workspace_id = workspace_id.into();
        let task = tokio::spawn(async move {
            run(api, workspace_id, policy, tx, shutdown).await;
        });
        Self { events, task }
    }

    /// Next event. An `Err` is terminal and is followed by `None`.
    pub async fn next(&mut self) -> Option<Result<Event>> {
        self.events.recv().await
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<A>(
    api: Arc<A>,
    workspace_id: String,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<Result<Event>>,
    shutdown: CancellationToken,
) where
    A: WorkspaceApi + ?Sized,
{
    let mut attempt = 0u32;
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = listen(api.as_ref(), &workspace_id, &tx, &mut attempt) => result,
        };

        if tx.is_closed() {
            return;
        }

        let cause = match result {
            Ok(()) => SyncError::StreamClosed,
            Err(e) if e.class() == FailureClass::Decode => {
                let _ = tx.send(Err(e)).await;
                return;
            }
            Err(e) => e,
        };

        attempt += 1;
        if attempt > policy.max_attempts {
            warn!("event stream lost: {}", cause);
            let _ = tx.send(Err(SyncError::StreamClosed)).await;
            return;
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            "event stream lost ({}), reconnecting in {:?} (attempt {}/{})",
            cause, delay, attempt, policy.max_attempts
        );
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// One connection. Returns `Ok` when the server closes the stream or the
/// receiver goes away.
async fn listen<A>(
    api: &A,
    workspace_id: &str,
    tx: &mpsc::Sender<Result<Event>>,
    attempt: &mut u32,
) -> Result<()>
where
    A: WorkspaceApi + ?Sized,
{
    let client_id = api.client_id(workspace_id).await?;
    let body = api.open_event_stream(workspace_id, &client_id).await?;
    api.announce_client(workspace_id, &client_id).await?;
    info!(workspace = workspace_id, client = %client_id, "listening for workspace events");

    let reader = StreamReader::new(body.map(|chunk| chunk.map_err(std::io::Error::other)));
    let mut frames = FramedRead::new(reader, FrameCodec::new());

    while let Some(frame) = frames.next().await {
        let frame = frame?;
        *attempt = 0;
        trace!(id = ?frame.id, event = ?frame.event, "frame");

        match classify(frame.data.as_bytes())? {
            Event::Ping { timestamp } => debug!(timestamp, "ping"),
            Event::Unknown { .. } => {}
            event => {
                if tx.send(Ok(event)).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}
