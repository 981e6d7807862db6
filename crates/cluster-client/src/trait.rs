//! ClusterClient trait for mocking
//!
//! This trait abstracts the Kubernetes side of the controller (watching pods and
//! opening log streams) so reconciler and dispatcher logic can be unit tested.

use crate::error::ClusterError;
use crate::models::{LogOptions, ResourceSnapshot, WatchEvent};
use bytes::Bytes;
use futures::stream::BoxStream;

/// Informer-style event stream for one namespace
pub type WatchStream = BoxStream<'static, Result<WatchEvent, ClusterError>>;

/// Raw bytes of a pod's log output
pub type LogByteStream = BoxStream<'static, Result<Bytes, ClusterError>>;

/// Trait for cluster operations used by the controller
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Start a long-lived watch over the pods of `namespace`.
    ///
    /// The stream resumes on its own after transient disconnects and reports
    /// each completed relist as `WatchEvent::Resynced`. Errors are yielded
    /// without ending the stream. With `resume` the stream continues an
    /// earlier watch of the namespace and its first relist is not initial.
    fn watch_pods(&self, namespace: &str, resume: bool) -> WatchStream;

    /// Open a byte stream of the pod's logs.
    ///
    /// Fails with `ClusterError::LogUnavailable` when the pod has no container
    /// that can serve logs yet.
    async fn open_log_stream(
        &self,
        snapshot: &ResourceSnapshot,
        options: &LogOptions,
    ) -> Result<LogByteStream, ClusterError>;
}
