//! Pod snapshot and watch event models

use crate::error::ClusterError;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::api::LogParams;
use std::collections::HashSet;
use std::fmt;

/// Stable key of a watched pod: namespace + name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Pod lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parse the `status.phase` string reported by the API server
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a pod at one point in time
///
/// Snapshots are never mutated once built; a newer observation replaces the
/// older snapshot wherever it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSnapshot {
    pub identity: ResourceIdentity,
    /// Instance id; differs between two pods that reused the same name
    pub uid: Option<String>,
    pub resource_version: Option<String>,
    pub phase: PodPhase,
    pub containers: Vec<String>,
    /// Sum of restart counts over all container statuses
    pub restart_count: i32,
    pub observed_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Build a snapshot from a pod object.
    ///
    /// Pods without a namespace are placed in `default_namespace`.
    /// A pod without a name cannot be tracked and is rejected.
    pub fn from_pod(pod: &Pod, default_namespace: &str) -> Result<Self, ClusterError> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::MalformedEvent("Pod missing name".to_string()))?;
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace.to_string());

        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();

        let status = pod.status.as_ref();
        let phase = PodPhase::parse(status.and_then(|s| s.phase.as_deref()));
        let restart_count = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(|cs| cs.restart_count).sum())
            .unwrap_or(0);

        Ok(Self {
            identity: ResourceIdentity::new(namespace, name),
            uid: pod.metadata.uid.clone(),
            resource_version: pod.metadata.resource_version.clone(),
            phase,
            containers,
            restart_count,
            observed_at: Utc::now(),
        })
    }

    /// Whether the API server can serve logs for this pod
    pub fn is_loggable(&self) -> bool {
        matches!(
            self.phase,
            PodPhase::Running | PodPhase::Succeeded | PodPhase::Failed
        ) && !self.containers.is_empty()
    }

    /// Whether both snapshots describe the same pod instance.
    ///
    /// A missing uid on either side is treated as a match.
    pub fn same_instance(&self, other: &ResourceSnapshot) -> bool {
        if self.identity != other.identity {
            return false;
        }
        match (&self.uid, &other.uid) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Resource version for log output, `"-"` when absent
    pub fn version(&self) -> &str {
        self.resource_version.as_deref().unwrap_or("-")
    }
}

/// Informer-style change notification for a watched pod collection
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// First observation of a pod instance
    Added(ResourceSnapshot),
    /// Change to a pod already observed
    Modified {
        previous: ResourceSnapshot,
        current: ResourceSnapshot,
    },
    /// Pod removed; `final_state_unknown` marks deletions inferred from a relist
    Deleted {
        snapshot: ResourceSnapshot,
        final_state_unknown: bool,
    },
    /// A full list of `namespace` completed; `live` holds every pod present in it
    Resynced {
        namespace: String,
        initial: bool,
        live: HashSet<ResourceIdentity>,
    },
}

impl WatchEvent {
    /// Short event kind for logging
    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "Added",
            WatchEvent::Modified { .. } => "Modified",
            WatchEvent::Deleted { .. } => "Deleted",
            WatchEvent::Resynced { .. } => "Resynced",
        }
    }
}

/// Options for pod log streams
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Container to read; the pod's default container when `None`
    pub container: Option<String>,
    /// Follow the stream until the container exits
    pub follow: bool,
    pub tail_lines: Option<i64>,
    pub since_seconds: Option<i64>,
    pub timestamps: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            container: None,
            follow: true,
            tail_lines: None,
            since_seconds: None,
            timestamps: false,
        }
    }
}

impl LogOptions {
    pub fn to_log_params(&self) -> LogParams {
        LogParams {
            container: self.container.clone(),
            follow: self.follow,
            tail_lines: self.tail_lines,
            since_seconds: self.since_seconds,
            timestamps: self.timestamps,
            ..LogParams::default()
        }
    }
}
