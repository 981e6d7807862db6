//! Kubernetes cluster client
//!
//! Implements [`ClusterClientTrait`] on top of kube-rs: pod watches through
//! `kube_runtime::watcher` and pod logs through `Api::<Pod>::log_stream`.

use crate::cluster_trait::{ClusterClientTrait, LogByteStream, WatchStream};
use crate::error::ClusterError;
use crate::informer::Informer;
use crate::models::{LogOptions, ResourceSnapshot};
use futures::{stream, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use kube_runtime::{watcher, WatchStreamExt};
use std::path::PathBuf;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// How to reach the cluster
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    /// Explicit kubeconfig file; inferred (env, home, in-cluster) when `None`
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to use instead of the current one
    pub context: Option<String>,
    /// Label selector applied to every pod watch
    pub label_selector: Option<String>,
}

/// Cluster client backed by a kube `Client`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    label_selector: Option<String>,
}

impl KubeClusterClient {
    /// Wrap an existing kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            label_selector: None,
        }
    }

    /// Restrict pod watches to pods matching `selector`
    pub fn with_label_selector(mut self, selector: Option<String>) -> Self {
        self.label_selector = selector;
        self
    }

    /// Build a client from the connection settings.
    ///
    /// With an explicit kubeconfig file the file is loaded directly; otherwise
    /// the configuration is inferred the same way `kubectl` does it.
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self, ClusterError> {
        let options = KubeConfigOptions {
            context: settings.context.clone(),
            ..Default::default()
        };

        let config = match &settings.kubeconfig {
            Some(path) => {
                info!("Loading kubeconfig from {}", path.display());
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await?
            }
            None if settings.context.is_some() => Config::from_kubeconfig(&options).await?,
            None => Config::infer().await?,
        };

        info!("Connecting to cluster at {}", config.cluster_url);
        let client = Client::try_from(config)?;
        Ok(Self::new(client).with_label_selector(settings.label_selector.clone()))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn watcher_config(&self) -> watcher::Config {
        match &self.label_selector {
            Some(selector) => watcher::Config::default().labels(selector),
            None => watcher::Config::default(),
        }
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for KubeClusterClient {
    fn watch_pods(&self, namespace: &str, resume: bool) -> WatchStream {
        debug!("Opening pod watch in {} (resume: {})", namespace, resume);
        let mut informer = Informer::new(namespace).resuming(resume);

        watcher(self.pods(namespace), self.watcher_config())
            .default_backoff()
            .map(move |result| match result {
                Ok(event) => informer.translate(event),
                Err(e) => vec![Err(ClusterError::from(e))],
            })
            .flat_map(stream::iter)
            .boxed()
    }

    async fn open_log_stream(
        &self,
        snapshot: &ResourceSnapshot,
        options: &LogOptions,
    ) -> Result<LogByteStream, ClusterError> {
        if !snapshot.is_loggable() {
            return Err(ClusterError::LogUnavailable(format!(
                "pod {} is {}",
                snapshot.identity, snapshot.phase
            )));
        }

        let api = self.pods(&snapshot.identity.namespace);
        let reader = api
            .log_stream(&snapshot.identity.name, &options.to_log_params())
            .await
            .map_err(|e| ClusterError::LogStreamOpen(format!("{}: {}", snapshot.identity, e)))?;

        // futures AsyncBufRead -> tokio AsyncRead -> stream of byte chunks
        let chunks = ReaderStream::new(reader.compat()).map_err(ClusterError::from);
        Ok(chunks.boxed())
    }
}
