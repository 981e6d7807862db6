//! Reconciliation logic for watched pods.
//!
//! This module turns watch events into registry changes and decides when a
//! log stream must start or stop. It never performs I/O itself: starting a
//! stream is handed to the [`ActionDispatcher`], which returns immediately.

use crate::dispatcher::ActionDispatcher;
use crate::error::ControllerError;
use crate::registry::{ActionId, Claim, ResourceRegistry};
use cluster_client::{ResourceIdentity, ResourceSnapshot, WatchEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a single event changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// A new log stream was started
    Dispatched(ActionId),
    /// A log stream already covers this pod
    AlreadyActive,
    /// Pod cannot serve logs yet
    NotLoggable,
    /// Tracking stopped and any stream cancelled
    Removed,
    /// Deletion with unknown final state; kept until the next resync
    MarkedStale,
    /// Nothing to do
    Ignored,
    /// Registry settled against a full list
    Resynced { initial: bool, removed: usize },
}

/// Reconciles pod events against the registry.
#[derive(Debug)]
pub struct Reconciler {
    registry: Arc<ResourceRegistry>,
    dispatcher: Arc<ActionDispatcher>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(registry: Arc<ResourceRegistry>, dispatcher: Arc<ActionDispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Reconciles one watch event.
    pub fn handle(&self, event: WatchEvent) -> Result<Reconciliation, ControllerError> {
        match event {
            WatchEvent::Added(snapshot) => Ok(self.on_add(snapshot)),
            WatchEvent::Modified { previous, current } => self.on_update(previous, current),
            WatchEvent::Deleted {
                snapshot,
                final_state_unknown,
            } => Ok(self.on_delete(snapshot, final_state_unknown)),
            WatchEvent::Resynced {
                namespace,
                initial,
                live,
            } => Ok(self.on_resync(&namespace, initial, &live)),
        }
    }

    /// Reconciles a newly observed pod.
    ///
    /// A re-add of a pod that is still tracked (relist after a watch gap) is
    /// expected. Pods that cannot serve logs yet leave the registry untouched.
    pub fn on_add(&self, snapshot: ResourceSnapshot) -> Reconciliation {
        info!(
            "Pod {} added (phase {}, version {})",
            snapshot.identity,
            snapshot.phase,
            snapshot.version()
        );
        if self.registry.contains_key(&snapshot.identity) {
            debug!("Pod {} re-observed while tracked", snapshot.identity);
        }
        if !snapshot.is_loggable() {
            return Reconciliation::NotLoggable;
        }
        self.observe(Arc::new(snapshot))
    }

    /// Reconciles a change to a known pod.
    ///
    /// This method:
    /// 1. Rejects updates whose two snapshots are not the same pod instance
    /// 2. Leaves pods that cannot serve logs yet alone
    /// 3. Claims the pod in the registry and starts exactly one log stream
    ///    when no stream has been started for it
    pub fn on_update(
        &self,
        previous: ResourceSnapshot,
        current: ResourceSnapshot,
    ) -> Result<Reconciliation, ControllerError> {
        if previous.identity != current.identity {
            return Err(ControllerError::MalformedEvent(format!(
                "update from {} to {} changes identity",
                previous.identity, current.identity
            )));
        }
        if !previous.same_instance(&current) {
            return Err(ControllerError::MalformedEvent(format!(
                "update of {} changes uid ({:?} -> {:?})",
                current.identity, previous.uid, current.uid
            )));
        }

        debug!(
            "Pod {} updated (version {} -> {}, phase {})",
            current.identity,
            previous.version(),
            current.version(),
            current.phase
        );
        Ok(self.observe(Arc::new(current)))
    }

    /// Reconciles a pod deletion.
    pub fn on_delete(&self, snapshot: ResourceSnapshot, final_state_unknown: bool) -> Reconciliation {
        info!(
            "Pod {} deleted{}",
            snapshot.identity,
            if final_state_unknown { " (final state unknown)" } else { "" }
        );

        let Some(tracked) = self.registry.get(&snapshot.identity) else {
            return Reconciliation::Ignored;
        };
        if !tracked.snapshot.same_instance(&snapshot) {
            warn!(
                "Ignoring deletion of {} for uid {:?}; tracking uid {:?}",
                snapshot.identity, snapshot.uid, tracked.snapshot.uid
            );
            return Reconciliation::Ignored;
        }

        if final_state_unknown {
            if tracked.stale {
                debug!("Pod {} already awaiting resync", snapshot.identity);
            }
            self.registry.mark_stale(&snapshot.identity);
            return Reconciliation::MarkedStale;
        }

        self.retire(&snapshot.identity);
        Reconciliation::Removed
    }

    /// Settles the pods of `namespace` against a full list of that namespace.
    pub fn on_resync(
        &self,
        namespace: &str,
        initial: bool,
        live: &HashSet<ResourceIdentity>,
    ) -> Reconciliation {
        let removed = self.registry.retain_live(namespace, live);
        for (identity, action) in &removed {
            debug!("Pod {} no longer listed, stopping action {}", identity, action);
            self.dispatcher.cancel(identity);
        }

        if initial {
            info!("Initial sync of {} complete: {} pods listed", namespace, live.len());
        } else {
            info!(
                "Resumed {} after watch gap: {} pods listed, {} stopped, {} tracked",
                namespace,
                live.len(),
                removed.len(),
                self.registry.len()
            );
        }
        Reconciliation::Resynced {
            initial,
            removed: removed.len(),
        }
    }

    fn observe(&self, snapshot: Arc<ResourceSnapshot>) -> Reconciliation {
        if !snapshot.is_loggable() {
            self.registry.refresh(snapshot);
            return Reconciliation::NotLoggable;
        }

        let identity = snapshot.identity.clone();
        match self.registry.claim(snapshot.clone()) {
            Claim::Granted(action) => {
                self.dispatcher.start_log_stream(snapshot, action);
                Reconciliation::Dispatched(action)
            }
            Claim::Held => {
                debug!("Pod {} already has a log stream", identity);
                Reconciliation::AlreadyActive
            }
        }
    }

    fn retire(&self, identity: &ResourceIdentity) {
        self.registry.remove(identity);
        if self.dispatcher.cancel(identity) {
            debug!("Cancelled log stream of {}", identity);
        }
    }
}
