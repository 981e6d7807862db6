//! Informer adapter
//!
//! Turns raw `kube_runtime::watcher::Event<Pod>` values into informer-style
//! [`WatchEvent`]s. The watcher only reports the current object, so the adapter
//! keeps the last seen snapshot per pod to pair every update with its
//! predecessor.
//!
//! Relists (`Init` .. `InitDone`) are tracked as well. Pods that were known
//! before the relist but are missing from it are reported as deletions with
//! unknown final state, and every relist ends with `WatchEvent::Resynced`.

use crate::error::ClusterError;
use crate::models::{ResourceIdentity, ResourceSnapshot, WatchEvent};
use k8s_openapi::api::core::v1::Pod;
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Local cache of observed pods for one watch stream
#[derive(Debug)]
pub struct Informer {
    default_namespace: String,
    known: HashMap<ResourceIdentity, ResourceSnapshot>,
    /// Identities seen by the relist in progress
    relist: Option<HashSet<ResourceIdentity>>,
    /// Set once the first relist has completed
    synced: bool,
}

impl Informer {
    pub fn new(default_namespace: impl Into<String>) -> Self {
        Self {
            default_namespace: default_namespace.into(),
            known: HashMap::new(),
            relist: None,
            synced: false,
        }
    }

    /// Mark the watch as a resume of an earlier one, so its first relist is
    /// not reported as initial.
    pub fn resuming(mut self, resume: bool) -> Self {
        self.synced = resume;
        self
    }

    /// Number of pods currently cached
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Translate one watcher event into zero or more informer events.
    pub fn translate(&mut self, event: watcher::Event<Pod>) -> Vec<Result<WatchEvent, ClusterError>> {
        match event {
            watcher::Event::Init => {
                debug!("Relist started in {}", self.default_namespace);
                self.relist = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(pod) => match self.snapshot(&pod) {
                Ok(snapshot) => {
                    if let Some(seen) = self.relist.as_mut() {
                        seen.insert(snapshot.identity.clone());
                    }
                    self.observe(snapshot)
                }
                Err(e) => vec![Err(e)],
            },
            watcher::Event::InitDone => self.finish_relist(),
            watcher::Event::Apply(pod) => match self.snapshot(&pod) {
                Ok(snapshot) => self.observe(snapshot),
                Err(e) => vec![Err(e)],
            },
            watcher::Event::Delete(pod) => match self.snapshot(&pod) {
                Ok(snapshot) => {
                    self.known.remove(&snapshot.identity);
                    vec![Ok(WatchEvent::Deleted {
                        snapshot,
                        final_state_unknown: false,
                    })]
                }
                Err(e) => vec![Err(e)],
            },
        }
    }

    fn snapshot(&self, pod: &Pod) -> Result<ResourceSnapshot, ClusterError> {
        ResourceSnapshot::from_pod(pod, &self.default_namespace)
    }

    fn observe(&mut self, current: ResourceSnapshot) -> Vec<Result<WatchEvent, ClusterError>> {
        match self.known.insert(current.identity.clone(), current.clone()) {
            None => vec![Ok(WatchEvent::Added(current))],
            Some(previous) if !previous.same_instance(&current) => {
                // Name reused by a new pod: never present it as an update
                debug!(
                    "Pod {} replaced (uid {:?} -> {:?})",
                    current.identity, previous.uid, current.uid
                );
                vec![
                    Ok(WatchEvent::Deleted {
                        snapshot: previous,
                        final_state_unknown: false,
                    }),
                    Ok(WatchEvent::Added(current)),
                ]
            }
            Some(previous) => vec![Ok(WatchEvent::Modified { previous, current })],
        }
    }

    fn finish_relist(&mut self) -> Vec<Result<WatchEvent, ClusterError>> {
        let live = self.relist.take().unwrap_or_default();

        let vanished: Vec<ResourceIdentity> = self
            .known
            .keys()
            .filter(|identity| !live.contains(*identity))
            .cloned()
            .collect();

        let mut events = Vec::with_capacity(vanished.len() + 1);
        for identity in vanished {
            if let Some(snapshot) = self.known.remove(&identity) {
                events.push(Ok(WatchEvent::Deleted {
                    snapshot,
                    final_state_unknown: true,
                }));
            }
        }

        let initial = !self.synced;
        self.synced = true;
        debug!(
            "Relist done in {}: {} live pods, {} vanished",
            self.default_namespace,
            live.len(),
            events.len()
        );
        events.push(Ok(WatchEvent::Resynced {
            namespace: self.default_namespace.clone(),
            initial,
            live,
        }));
        events
    }
}
