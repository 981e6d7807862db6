//! Test utilities for unit testing the registry, dispatcher and reconciler
//!
//! This module provides helpers for creating pod snapshots and observing
//! log output without a cluster.

use crate::dispatcher::ActionReport;
use bytes::Bytes;
use chrono::Utc;
use cluster_client::{PodPhase, ResourceIdentity, ResourceSnapshot};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

pub const TEST_NAMESPACE: &str = "default";

const WAIT: Duration = Duration::from_secs(2);

/// Identity of a test pod in [`TEST_NAMESPACE`]
pub fn identity(name: &str) -> ResourceIdentity {
    ResourceIdentity::new(TEST_NAMESPACE, name)
}

fn pod(name: &str, version: &str, phase: PodPhase) -> Arc<ResourceSnapshot> {
    Arc::new(ResourceSnapshot {
        identity: identity(name),
        uid: Some(format!("{}-uid", name)),
        resource_version: Some(version.to_string()),
        phase,
        containers: vec!["app".to_string()],
        restart_count: 0,
        observed_at: Utc::now(),
    })
}

/// Helper to create a running pod with one container
pub fn running_pod(name: &str, version: &str) -> Arc<ResourceSnapshot> {
    pod(name, version, PodPhase::Running)
}

/// Helper to create a pod still waiting to be scheduled
pub fn pending_pod(name: &str, version: &str) -> Arc<ResourceSnapshot> {
    pod(name, version, PodPhase::Pending)
}

pub fn chunks(parts: &[&str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::from(p.to_string())).collect()
}

/// In-memory output that can be inspected while tasks write to it
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Wait for the next task report, failing the test after a timeout
pub async fn next_report(reports: &mut mpsc::UnboundedReceiver<ActionReport>) -> ActionReport {
    tokio::time::timeout(WAIT, reports.recv())
        .await
        .expect("timed out waiting for action report")
        .expect("report channel closed")
}

/// Wait until `buffer` holds exactly `expected`
pub async fn wait_for_output(buffer: &SharedBuffer, expected: &str) {
    tokio::time::timeout(WAIT, async {
        while buffer.contents() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected output {:?}, got {:?}", expected, buffer.contents()));
}

/// Wait until `condition` holds, failing the test after a timeout
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Let spawned tasks run until they block
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
