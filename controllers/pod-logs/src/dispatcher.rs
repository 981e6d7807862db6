//! Log stream dispatcher.
//!
//! Owns the boundary between the watch event path and the long-running log
//! stream tasks. Starting a stream never blocks: the task is spawned on a
//! `TaskTracker` and the caller returns immediately. Each task gets its own
//! cancellation token (a child of the dispatcher's shutdown token) so it can
//! be stopped by pod identity or all at once on shutdown.

use crate::error::ControllerError;
use crate::registry::{ActionId, ResourceRegistry};
use chrono::{DateTime, Utc};
use cluster_client::{ClusterClientTrait, LogByteStream, LogOptions, ResourceIdentity, ResourceSnapshot};
use futures::StreamExt;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Shared destination for raw log bytes
///
/// Every chunk is written and flushed under one lock, so chunks coming from
/// different pods never interleave mid-chunk.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<tokio::sync::Mutex<Pin<Box<dyn AsyncWrite + Send>>>>,
}

impl OutputSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(Box::pin(writer))),
        }
    }

    /// Process standard output
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    async fn write_chunk(&self, chunk: &[u8]) -> std::io::Result<()> {
        let mut writer = self.inner.lock().await;
        writer.write_all(chunk).await?;
        writer.flush().await
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}

/// How a log stream task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Stream reached its end
    Completed { bytes: u64 },
    /// Stopped by deletion, resync or shutdown
    Cancelled { bytes: u64 },
    /// Stream could not be opened
    OpenFailed(String),
    /// Stream broke while copying
    CopyFailed { bytes: u64, error: String },
}

/// Completion report of one log stream task
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub identity: ResourceIdentity,
    pub action: ActionId,
    pub outcome: ActionOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// In-flight task for one pod
#[derive(Debug)]
struct ActiveAction {
    action: ActionId,
    cancel: CancellationToken,
}

type ActiveSet = Arc<Mutex<HashMap<ResourceIdentity, ActiveAction>>>;

fn lock_active(active: &ActiveSet) -> MutexGuard<'_, HashMap<ResourceIdentity, ActiveAction>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts, tracks and cancels log stream tasks.
pub struct ActionDispatcher {
    client: Arc<dyn ClusterClientTrait>,
    registry: Arc<ResourceRegistry>,
    sink: OutputSink,
    options: LogOptions,
    active: ActiveSet,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    reports: Option<mpsc::UnboundedSender<ActionReport>>,
}

impl fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("options", &self.options)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl ActionDispatcher {
    /// Creates a new dispatcher writing every log stream to `sink`.
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        registry: Arc<ResourceRegistry>,
        sink: OutputSink,
        options: LogOptions,
    ) -> Self {
        Self {
            client,
            registry,
            sink,
            options,
            active: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            reports: None,
        }
    }

    /// Send an [`ActionReport`] for every finished task to `reports`.
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<ActionReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Start streaming logs of `snapshot`'s pod under `action`.
    ///
    /// Returns immediately; the task runs until the stream ends, fails or is
    /// cancelled. A task still registered for the same pod is cancelled first.
    pub fn start_log_stream(&self, snapshot: Arc<ResourceSnapshot>, action: ActionId) {
        let cancel = self.shutdown.child_token();
        let identity = snapshot.identity.clone();

        if let Some(previous) = lock_active(&self.active).insert(
            identity.clone(),
            ActiveAction {
                action,
                cancel: cancel.clone(),
            },
        ) {
            debug!("Replacing log stream action {} for {}", previous.action, identity);
            previous.cancel.cancel();
        }

        let task = LogStreamTask {
            client: self.client.clone(),
            registry: self.registry.clone(),
            sink: self.sink.clone(),
            options: self.options.clone(),
            active: self.active.clone(),
            reports: self.reports.clone(),
            snapshot,
            action,
            cancel,
        };
        self.tracker.spawn(task.run());
    }

    /// Cancel the running task for `identity`, if any.
    pub fn cancel(&self, identity: &ResourceIdentity) -> bool {
        match lock_active(&self.active).remove(identity) {
            Some(active) => {
                debug!("Cancelling log stream action {} for {}", active.action, identity);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self, identity: &ResourceIdentity) -> bool {
        lock_active(&self.active).contains_key(identity)
    }

    pub fn active_count(&self) -> usize {
        lock_active(&self.active).len()
    }

    /// Cancel every task and wait for all of them to finish.
    pub async fn shutdown(&self) {
        info!("Stopping {} log stream(s)", self.active_count());
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("All log streams stopped");
    }
}

/// How the copy loop stopped without an error
enum CopyEnd {
    Finished(u64),
    Cancelled(u64),
}

struct LogStreamTask {
    client: Arc<dyn ClusterClientTrait>,
    registry: Arc<ResourceRegistry>,
    sink: OutputSink,
    options: LogOptions,
    active: ActiveSet,
    reports: Option<mpsc::UnboundedSender<ActionReport>>,
    snapshot: Arc<ResourceSnapshot>,
    action: ActionId,
    cancel: CancellationToken,
}

impl LogStreamTask {
    async fn run(self) {
        let identity = self.snapshot.identity.clone();
        let started_at = Utc::now();
        info!("Streaming logs of pod {} (action {})", identity, self.action);

        let outcome = match self.open().await {
            Ok(Some(stream)) => match copy_stream(stream, &self.sink, &self.cancel).await {
                Ok(CopyEnd::Finished(bytes)) => ActionOutcome::Completed { bytes },
                Ok(CopyEnd::Cancelled(bytes)) => ActionOutcome::Cancelled { bytes },
                Err((bytes, e)) => ActionOutcome::CopyFailed {
                    bytes,
                    error: e.to_string(),
                },
            },
            Ok(None) => ActionOutcome::Cancelled { bytes: 0 },
            Err(e) => ActionOutcome::OpenFailed(e.to_string()),
        };

        match &outcome {
            ActionOutcome::Completed { bytes } => {
                info!("Log stream of pod {} ended ({} bytes)", identity, bytes);
            }
            ActionOutcome::Cancelled { bytes } => {
                info!("Log stream of pod {} cancelled ({} bytes)", identity, bytes);
            }
            ActionOutcome::OpenFailed(e) => {
                error!("Failed to open log stream of pod {}: {}", identity, e);
            }
            ActionOutcome::CopyFailed { bytes, error } => {
                error!("Log stream of pod {} failed after {} bytes: {}", identity, bytes, error);
            }
        }

        self.release(&outcome);

        if let Some(reports) = &self.reports {
            let report = ActionReport {
                identity,
                action: self.action,
                outcome,
                started_at,
                finished_at: Utc::now(),
            };
            if reports.send(report).is_err() {
                debug!("Action report receiver dropped");
            }
        }
    }

    /// Open the log stream; `Ok(None)` when cancelled before it opened.
    async fn open(&self) -> Result<Option<LogByteStream>, ControllerError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Ok(None),
            opened = self.client.open_log_stream(&self.snapshot, &self.options) => opened
                .map(Some)
                .map_err(|e| ControllerError::LogStreamOpen(e.to_string())),
        }
    }

    /// Drop this task from the active set and retire its registry entry.
    fn release(&self, outcome: &ActionOutcome) {
        let identity = &self.snapshot.identity;
        {
            let mut active = lock_active(&self.active);
            if active.get(identity).is_some_and(|a| a.action == self.action) {
                active.remove(identity);
            }
        }

        let finished = matches!(outcome, ActionOutcome::Completed { .. });
        if self.registry.retire(identity, self.action, finished) && !finished {
            warn!("Pod {} released; a later update may start a new log stream", identity);
        }
    }
}

/// Copy chunks to the sink until end of stream, error or cancellation.
///
/// The cancellation token is checked before every read.
async fn copy_stream(
    mut stream: LogByteStream,
    sink: &OutputSink,
    cancel: &CancellationToken,
) -> Result<CopyEnd, (u64, ControllerError)> {
    let mut copied: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(CopyEnd::Cancelled(copied)),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                sink.write_chunk(&chunk)
                    .await
                    .map_err(|e| (copied, ControllerError::LogCopy(e.to_string())))?;
                copied += chunk.len() as u64;
            }
            Some(Err(e)) => return Err((copied, ControllerError::LogCopy(e.to_string()))),
            None => return Ok(CopyEnd::Finished(copied)),
        }
    }
}
