//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the registry,
//! dispatcher, reconciler and one watcher per namespace together, and runs
//! them until Ctrl-C, the configured run duration or a watcher failure.

use crate::config::Config;
use crate::dispatcher::{ActionDispatcher, ActionOutcome, ActionReport, OutputSink};
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::registry::ResourceRegistry;
use crate::watcher::Watcher;
use cluster_client::{ClusterClientTrait, KubeClusterClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main controller for pod log streaming.
pub struct Controller {
    dispatcher: Arc<ActionDispatcher>,
    watchers: JoinSet<Result<(), ControllerError>>,
    report_logger: JoinHandle<()>,
    shutdown: CancellationToken,
    run_for: Option<Duration>,
}

impl Controller {
    /// Creates a new controller connected to the configured cluster.
    pub async fn new(config: &Config) -> Result<Self, ControllerError> {
        info!("Initializing Pod Logs Controller");

        let client = KubeClusterClient::connect(&config.connection).await.map_err(|e| {
            error!("Failed to connect to the cluster: {}", e);
            error!("Please ensure KUBECONFIG_FILE / KUBE_CONTEXT point at a reachable cluster");
            ControllerError::Cluster(e)
        })?;
        info!("Cluster client ready");

        Ok(Self::with_client(Arc::new(client), OutputSink::stdout(), config))
    }

    /// Creates a controller on top of an existing client and output.
    ///
    /// Watchers start immediately; must be called inside a Tokio runtime.
    pub fn with_client(client: Arc<dyn ClusterClientTrait>, sink: OutputSink, config: &Config) -> Self {
        let registry = Arc::new(ResourceRegistry::new());
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(
            ActionDispatcher::new(client.clone(), registry.clone(), sink, config.log.clone())
                .with_reports(report_tx),
        );
        let reconciler = Arc::new(Reconciler::new(registry, dispatcher.clone()));
        let shutdown = CancellationToken::new();

        // Start one watcher per namespace in background tasks
        let mut watchers = JoinSet::new();
        for namespace in &config.namespaces {
            let watcher = Watcher::new(
                client.clone(),
                reconciler.clone(),
                namespace.clone(),
                config.watch_backoff_min_secs,
                config.watch_backoff_max_secs,
            );
            let shutdown = shutdown.clone();
            watchers.spawn(async move {
                debug!("Watcher task for namespace {} started", watcher.namespace());
                watcher.run(shutdown).await
            });
        }

        let report_logger = tokio::spawn(log_reports(report_rx));

        Self {
            dispatcher,
            watchers,
            report_logger,
            shutdown,
            run_for: config.run_for,
        }
    }

    /// Runs the controller until shutdown.
    ///
    /// Shutdown stops the watchers first, then cancels every log stream and
    /// waits for all tasks to finish.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Self {
            dispatcher,
            mut watchers,
            report_logger,
            shutdown,
            run_for,
        } = self;
        info!("Pod Logs Controller running with {} watcher(s)", watchers.len());

        let result = tokio::select! {
            () = shutdown_signal() => {
                info!("Received Ctrl-C, shutting down");
                Ok(())
            }
            () = run_deadline(run_for) => {
                info!("Run duration elapsed, shutting down");
                Ok(())
            }
            Some(joined) = watchers.join_next() => match joined {
                Ok(Ok(())) => Err(ControllerError::Watch("Pod watcher exited unexpectedly".to_string())),
                Ok(Err(e)) => Err(ControllerError::Watch(format!("Pod watcher error: {}", e))),
                Err(e) => Err(ControllerError::Watch(format!("Pod watcher panicked: {}", e))),
            },
        };

        shutdown.cancel();
        while let Some(joined) = watchers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Pod watcher stopped with error: {}", e),
                Err(e) => warn!("Pod watcher panicked during shutdown: {}", e),
            }
        }

        dispatcher.shutdown().await;
        // Last sender goes with the dispatcher; the logger drains and exits
        drop(dispatcher);
        if let Err(e) = report_logger.await {
            warn!("Report logger panicked: {}", e);
        }

        if let Err(e) = &result {
            error!("Pod Logs Controller stopped: {}", e);
        } else {
            info!("Pod Logs Controller stopped");
        }
        result
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn run_deadline(run_for: Option<Duration>) {
    match run_for {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

/// Log every finished log stream action and a final tally.
async fn log_reports(mut reports: mpsc::UnboundedReceiver<ActionReport>) {
    let mut completed = 0usize;
    let mut failed = 0usize;
    let mut cancelled = 0usize;

    while let Some(report) = reports.recv().await {
        let elapsed = report.finished_at - report.started_at;
        match &report.outcome {
            ActionOutcome::Completed { .. } => completed += 1,
            ActionOutcome::Cancelled { .. } => cancelled += 1,
            ActionOutcome::OpenFailed(_) | ActionOutcome::CopyFailed { .. } => failed += 1,
        }
        debug!(
            "Action {} for pod {} finished after {}ms: {:?}",
            report.action,
            report.identity,
            elapsed.num_milliseconds(),
            report.outcome
        );
    }

    info!(
        "Log stream actions: {} completed, {} cancelled, {} failed",
        completed, cancelled, failed
    );
}
