//! Cluster Client
//!
//! A thin Kubernetes client for the pod logs controller.
//! Provides typed pod snapshots, an informer-style watch stream and pod log streaming.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{ClusterClientTrait, ConnectionSettings, KubeClusterClient, LogOptions, WatchEvent};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubeClusterClient::connect(&ConnectionSettings::default()).await?;
//!
//! let mut events = client.watch_pods("dev", false);
//! while let Some(event) = events.next().await {
//!     if let WatchEvent::Added(pod) = event? {
//!         if pod.is_loggable() {
//!             let _logs = client.open_log_stream(&pod, &LogOptions::default()).await?;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Informer Semantics**: Added / Modified (with previous snapshot) / Deleted / Resynced
//! - **Relist Detection**: Pods that vanished during a watch gap are reported as
//!   deletions with unknown final state
//! - **Log Streaming**: Raw byte streams of pod logs
//! - **Mocking**: `MockClusterClient` behind the `test-util` feature

pub mod client;
pub mod error;
pub mod informer;
pub mod models;
#[path = "trait.rs"]
pub mod cluster_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::{ConnectionSettings, KubeClusterClient};
pub use cluster_trait::{ClusterClientTrait, LogByteStream, WatchStream};
pub use error::ClusterError;
pub use informer::Informer;
pub use models::*;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, MockLog};
