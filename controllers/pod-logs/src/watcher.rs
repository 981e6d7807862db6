//! Pod watchers.
//!
//! One watcher runs per namespace. It consumes the informer-style event
//! stream of the cluster client, hands every event to the reconciler in
//! arrival order and restarts the watch with a Fibonacci backoff whenever the
//! stream ends.

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use cluster_client::{ClusterClientTrait, WatchEvent, WatchStream};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters for one watch stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatchSummary {
    /// Events delivered by the stream
    pub events: usize,
    /// Events the reconciler refused
    pub rejected: usize,
    /// Transport errors reported by the stream
    pub errors: usize,
    /// Completed relists
    pub resyncs: usize,
}

/// Watches pods of one namespace and feeds the reconciler.
pub struct Watcher {
    client: Arc<dyn ClusterClientTrait>,
    reconciler: Arc<Reconciler>,
    namespace: String,
    backoff_min_secs: u64,
    backoff_max_secs: u64,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        reconciler: Arc<Reconciler>,
        namespace: impl Into<String>,
        backoff_min_secs: u64,
        backoff_max_secs: u64,
    ) -> Self {
        Self {
            client,
            reconciler,
            namespace: namespace.into(),
            backoff_min_secs,
            backoff_max_secs,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Watch until `shutdown` is cancelled.
    ///
    /// A stream that ends is restarted after a backoff delay. The delay is
    /// reset whenever the previous stream delivered at least one event.
    /// Once a relist has completed, restarted streams are opened as resumes.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        let mut backoff = FibonacciBackoff::new(self.backoff_min_secs, self.backoff_max_secs);
        let mut synced = false;

        loop {
            info!("Starting pod watch in namespace {}", self.namespace);
            let stream = self.client.watch_pods(&self.namespace, synced);

            let summary = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                summary = self.consume(stream) => summary,
            };

            synced |= summary.resyncs > 0;
            if summary.events > 0 {
                backoff.reset();
            }
            let delay = backoff.next_backoff();
            warn!(
                "Pod watch in namespace {} ended after {} events ({} rejected, {} errors); restarting in {:?}",
                self.namespace, summary.events, summary.rejected, summary.errors, delay
            );

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("Pod watch in namespace {} stopped", self.namespace);
        Ok(())
    }

    /// Drain `stream`, reconciling each event in order.
    ///
    /// Neither rejected events nor transport errors stop the stream.
    async fn consume(&self, mut stream: WatchStream) -> WatchSummary {
        let mut summary = WatchSummary::default();

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    summary.events += 1;
                    if matches!(event, WatchEvent::Resynced { .. }) {
                        summary.resyncs += 1;
                    }
                    let kind = event.kind();
                    match self.reconciler.handle(event) {
                        Ok(outcome) => debug!("{} event in {}: {:?}", kind, self.namespace, outcome),
                        Err(e) => {
                            summary.rejected += 1;
                            warn!("Dropping {} event in {}: {}", kind, self.namespace, e);
                        }
                    }
                }
                Err(e) => {
                    summary.errors += 1;
                    warn!("Pod watch error in namespace {}: {}", self.namespace, e);
                }
            }
        }

        summary
    }
}
