//! Controller-specific error types.
//!
//! This module defines error types specific to the Pod Logs Controller
//! that are not covered by the cluster client errors.

use cluster_client::ClusterError;
use thiserror::Error;

/// Errors that can occur in the Pod Logs Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Cluster API error
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Watch event that cannot be reconciled
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Log stream could not be opened
    #[error("Log stream open failed: {0}")]
    LogStreamOpen(String),

    /// Copying log bytes to the output failed
    #[error("Log copy failed: {0}")]
    LogCopy(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
