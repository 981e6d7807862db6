//! Resource registry.
//!
//! In-memory map from pod identity to the pod being tracked for log streaming.
//! An entry exists only while a log stream action has been started for the
//! identity and not yet retired. Every operation takes the single lock once,
//! so check-then-act sequences such as [`ResourceRegistry::claim`] are atomic.

use cluster_client::{ResourceIdentity, ResourceSnapshot};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifier of one started log stream action
pub type ActionId = u64;

/// Progress of the action owning a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    /// Log stream task is running
    Streaming,
    /// Log stream reached its end; kept so the same output is not replayed
    Finished,
}

/// Registry entry for one pod
#[derive(Debug, Clone)]
pub struct TrackedResource {
    pub snapshot: Arc<ResourceSnapshot>,
    pub action: ActionId,
    pub state: ActionState,
    /// Deletion seen with unknown final state; settled by the next resync
    pub stale: bool,
}

/// Result of [`ResourceRegistry::claim`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Caller must start the action with this id
    Granted(ActionId),
    /// An action already covers this pod
    Held,
}

/// Thread-safe map of tracked pods.
#[derive(Debug)]
pub struct ResourceRegistry {
    entries: Mutex<HashMap<ResourceIdentity, TrackedResource>>,
    next_action: AtomicU64,
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_action: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceIdentity, TrackedResource>> {
        // Entries are replaced whole, so a poisoned map is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains_key(&self, identity: &ResourceIdentity) -> bool {
        self.lock().contains_key(identity)
    }

    pub fn get(&self, identity: &ResourceIdentity) -> Option<TrackedResource> {
        self.lock().get(identity).cloned()
    }

    pub fn remove(&self, identity: &ResourceIdentity) -> Option<TrackedResource> {
        self.lock().remove(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Atomically claim the right to stream logs for `snapshot`'s pod.
    ///
    /// - absent identity: insert a `Streaming` entry and grant a new action
    /// - `Finished` entry whose containers restarted since: re-grant
    /// - otherwise: store the newer snapshot and report `Held`
    pub fn claim(&self, snapshot: Arc<ResourceSnapshot>) -> Claim {
        let mut entries = self.lock();
        match entries.get_mut(&snapshot.identity) {
            None => {
                let action = self.next_action.fetch_add(1, Ordering::Relaxed);
                entries.insert(
                    snapshot.identity.clone(),
                    TrackedResource {
                        snapshot,
                        action,
                        state: ActionState::Streaming,
                        stale: false,
                    },
                );
                Claim::Granted(action)
            }
            Some(entry)
                if entry.state == ActionState::Finished
                    && snapshot.restart_count > entry.snapshot.restart_count =>
            {
                let action = self.next_action.fetch_add(1, Ordering::Relaxed);
                *entry = TrackedResource {
                    snapshot,
                    action,
                    state: ActionState::Streaming,
                    stale: false,
                };
                Claim::Granted(action)
            }
            Some(entry) => {
                entry.snapshot = snapshot;
                entry.stale = false;
                Claim::Held
            }
        }
    }

    /// Replace the stored snapshot of a tracked pod. Returns false if untracked.
    pub fn refresh(&self, snapshot: Arc<ResourceSnapshot>) -> bool {
        match self.lock().get_mut(&snapshot.identity) {
            Some(entry) => {
                entry.snapshot = snapshot;
                entry.stale = false;
                true
            }
            None => false,
        }
    }

    /// Retire the entry owned by `action`.
    ///
    /// With `finished` the entry is kept in the `Finished` state, otherwise it
    /// is removed. Entries owned by another action are left untouched.
    pub fn retire(&self, identity: &ResourceIdentity, action: ActionId, finished: bool) -> bool {
        let mut entries = self.lock();
        match entries.get_mut(identity) {
            Some(entry) if entry.action == action => {
                if finished {
                    entry.state = ActionState::Finished;
                } else {
                    entries.remove(identity);
                }
                true
            }
            _ => false,
        }
    }

    /// Flag a tracked pod whose deletion was inferred rather than observed.
    pub fn mark_stale(&self, identity: &ResourceIdentity) -> bool {
        match self.lock().get_mut(identity) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Keep only the pods of `namespace` that are in `live` and clear their
    /// stale flags. Entries of other namespaces are left untouched.
    ///
    /// Returns the removed identities with the actions that owned them.
    pub fn retain_live(
        &self,
        namespace: &str,
        live: &HashSet<ResourceIdentity>,
    ) -> Vec<(ResourceIdentity, ActionId)> {
        let mut entries = self.lock();
        let mut removed = Vec::new();
        entries.retain(|identity, entry| {
            if identity.namespace != namespace {
                true
            } else if live.contains(identity) {
                entry.stale = false;
                true
            } else {
                removed.push((identity.clone(), entry.action));
                false
            }
        });
        removed
    }
}
