//! Mock ClusterClient for unit testing
//!
//! This module provides a mock implementation of ClusterClientTrait that can be used
//! in unit tests without requiring a running Kubernetes cluster.

use crate::cluster_trait::{ClusterClientTrait, LogByteStream, WatchStream};
use crate::error::ClusterError;
use crate::models::{LogOptions, ResourceIdentity, ResourceSnapshot, WatchEvent};
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Scripted log behaviour for one pod
#[derive(Debug, Clone)]
pub enum MockLog {
    /// Yield the chunks, then end the stream
    Complete(Vec<Bytes>),
    /// Yield the chunks, then stay open (like a followed, quiet container)
    Follow(Vec<Bytes>),
    /// Fail when the stream is opened
    FailOpen(String),
    /// Yield the chunks, then fail mid-stream
    FailAfter(Vec<Bytes>, String),
}

/// Mock ClusterClient for testing
///
/// Watch events are scripted per namespace; once drained the watch stream stays
/// open like an idle watch. Log streams are scripted per pod identity; pods
/// without a script produce an empty, completed stream.
#[derive(Clone, Default)]
pub struct MockClusterClient {
    // Scripted watch items per namespace
    events: Arc<Mutex<HashMap<String, Vec<Result<WatchEvent, String>>>>>,
    // Scripted logs per pod
    logs: Arc<Mutex<HashMap<ResourceIdentity, MockLog>>>,
    // Every log stream open attempt, in order
    opened: Arc<Mutex<Vec<ResourceIdentity>>>,
    // Number of watch_pods calls per namespace
    watches: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockClusterClient {
    /// Create a new mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a watch event for `namespace` (for test setup)
    pub fn push_event(&self, namespace: &str, event: WatchEvent) {
        self.events
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push(Ok(event));
    }

    /// Queue a transport error for `namespace` (for test setup)
    pub fn push_watch_error(&self, namespace: &str, message: &str) {
        self.events
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default()
            .push(Err(message.to_string()));
    }

    /// Script the log stream of a pod (for test setup)
    pub fn set_log(&self, identity: ResourceIdentity, log: MockLog) {
        self.logs.lock().unwrap().insert(identity, log);
    }

    /// Number of log stream open attempts for one pod
    pub fn open_count(&self, identity: &ResourceIdentity) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|opened| *opened == identity)
            .count()
    }

    /// Number of watches started for `namespace`
    pub fn watch_count(&self, namespace: &str) -> usize {
        self.watches
            .lock()
            .unwrap()
            .get(namespace)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    fn watch_pods(&self, namespace: &str, _resume: bool) -> WatchStream {
        *self
            .watches
            .lock()
            .unwrap()
            .entry(namespace.to_string())
            .or_default() += 1;

        let scripted = self
            .events
            .lock()
            .unwrap()
            .remove(namespace)
            .unwrap_or_default();

        stream::iter(
            scripted
                .into_iter()
                .map(|item| item.map_err(ClusterError::Mock)),
        )
        .chain(stream::pending())
        .boxed()
    }

    async fn open_log_stream(
        &self,
        snapshot: &ResourceSnapshot,
        _options: &LogOptions,
    ) -> Result<LogByteStream, ClusterError> {
        self.opened.lock().unwrap().push(snapshot.identity.clone());

        let script = self.logs.lock().unwrap().get(&snapshot.identity).cloned();
        match script {
            None => Ok(stream::empty().boxed()),
            Some(MockLog::Complete(chunks)) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Some(MockLog::Follow(chunks)) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
            Some(MockLog::FailOpen(message)) => Err(ClusterError::LogStreamOpen(message)),
            Some(MockLog::FailAfter(chunks, message)) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::once(async move { Err(ClusterError::Mock(message)) }))
                .boxed()),
        }
    }
}
