//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Kubernetes API request/response error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Watch transport error (the watcher retries on its own)
    #[error("Watch error: {0}")]
    Watch(#[from] kube_runtime::watcher::Error),

    /// Kubeconfig file could not be loaded
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    /// No usable cluster configuration could be inferred
    #[error("Cluster configuration error: {0}")]
    InferConfig(#[from] kube::config::InferConfigError),

    /// Log stream could not be opened
    #[error("Failed to open log stream: {0}")]
    LogStreamOpen(String),

    /// Pod has no running or terminated container to read logs from
    #[error("Logs not available: {0}")]
    LogUnavailable(String),

    /// Reading from an open log stream failed
    #[error("Log read error: {0}")]
    LogRead(#[from] std::io::Error),

    /// Watch event carried an unusable object (e.g., missing name)
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Scripted failure from the mock client
    #[cfg(feature = "test-util")]
    #[error("Mock error: {0}")]
    Mock(String),
}
