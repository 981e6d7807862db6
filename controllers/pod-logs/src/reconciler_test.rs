//! Unit tests for the pod reconciler

#[cfg(test)]
mod tests {
    use crate::dispatcher::{ActionDispatcher, ActionOutcome, ActionReport, OutputSink};
    use crate::error::ControllerError;
    use crate::reconciler::{Reconciler, Reconciliation};
    use crate::registry::ResourceRegistry;
    use crate::test_utils::*;
    use cluster_client::{
        LogOptions, MockClusterClient, MockLog, ResourceIdentity, ResourceSnapshot, WatchEvent,
    };
    use std::collections::HashSet;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct Setup {
        client: MockClusterClient,
        registry: Arc<ResourceRegistry>,
        dispatcher: Arc<ActionDispatcher>,
        reconciler: Reconciler,
        output: SharedBuffer,
        reports: mpsc::UnboundedReceiver<ActionReport>,
    }

    fn setup() -> Setup {
        let client = MockClusterClient::new();
        let registry = Arc::new(ResourceRegistry::new());
        let output = SharedBuffer::default();
        let (tx, reports) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(
            ActionDispatcher::new(
                Arc::new(client.clone()),
                registry.clone(),
                OutputSink::new(output.clone()),
                LogOptions::default(),
            )
            .with_reports(tx),
        );
        let reconciler = Reconciler::new(registry.clone(), dispatcher.clone());
        Setup {
            client,
            registry,
            dispatcher,
            reconciler,
            output,
            reports,
        }
    }

    fn snap(name: &str, version: &str) -> ResourceSnapshot {
        (*running_pod(name, version)).clone()
    }

    fn modified(previous: ResourceSnapshot, current: ResourceSnapshot) -> WatchEvent {
        WatchEvent::Modified { previous, current }
    }

    #[tokio::test]
    async fn test_added_then_modified_dispatches_once() {
        let s = setup();
        let a1 = snap("a", "v1");
        let a2 = snap("a", "v2");
        s.client.set_log(a1.identity.clone(), MockLog::Follow(Vec::new()));

        let added = s.reconciler.handle(WatchEvent::Added(a1.clone())).unwrap();
        let updated = s.reconciler.handle(modified(a1.clone(), a2)).unwrap();

        assert!(matches!(added, Reconciliation::Dispatched(_)));
        assert_eq!(updated, Reconciliation::AlreadyActive);
        let entry = s.registry.get(&a1.identity).unwrap();
        assert_eq!(entry.snapshot.version(), "v2");

        settle().await;
        assert_eq!(s.client.open_count(&a1.identity), 1);
    }

    #[tokio::test]
    async fn test_repeated_updates_keep_a_single_stream() {
        let s = setup();
        let a1 = snap("a", "v1");
        let a2 = snap("a", "v2");
        let a3 = snap("a", "v3");
        s.client.set_log(a1.identity.clone(), MockLog::Follow(Vec::new()));

        s.reconciler.handle(WatchEvent::Added(a1.clone())).unwrap();
        s.reconciler.handle(modified(a1.clone(), a2.clone())).unwrap();
        let last = s.reconciler.handle(modified(a2, a3)).unwrap();

        assert_eq!(last, Reconciliation::AlreadyActive);
        assert_eq!(s.registry.get(&a1.identity).unwrap().snapshot.version(), "v3");
        settle().await;
        assert_eq!(s.client.open_count(&a1.identity), 1);
    }

    #[tokio::test]
    async fn test_completed_stream_is_not_replayed_by_later_updates() {
        let mut s = setup();
        let a1 = snap("a", "v1");
        s.client.set_log(a1.identity.clone(), MockLog::Complete(chunks(&["done\n"])));

        s.reconciler.handle(WatchEvent::Added(a1.clone())).unwrap();
        let report = next_report(&mut s.reports).await;
        assert!(matches!(report.outcome, ActionOutcome::Completed { .. }));

        let mut succeeded = snap("a", "v2");
        succeeded.phase = cluster_client::PodPhase::Succeeded;
        let outcome = s.reconciler.handle(modified(a1.clone(), succeeded)).unwrap();

        assert_eq!(outcome, Reconciliation::AlreadyActive);
        assert_eq!(s.client.open_count(&a1.identity), 1);
        assert_eq!(s.output.contents(), "done\n");
    }

    #[tokio::test]
    async fn test_pending_pod_waits_for_running_update() {
        let s = setup();
        let pending = (*pending_pod("a", "v1")).clone();
        let running = snap("a", "v2");
        s.client.set_log(running.identity.clone(), MockLog::Follow(Vec::new()));

        assert_eq!(
            s.reconciler.handle(WatchEvent::Added(pending.clone())).unwrap(),
            Reconciliation::NotLoggable
        );
        assert!(s.registry.is_empty());

        let outcome = s.reconciler.handle(modified(pending, running.clone())).unwrap();
        assert!(matches!(outcome, Reconciliation::Dispatched(_)));
        assert!(s.dispatcher.is_active(&running.identity));
    }

    #[tokio::test]
    async fn test_replayed_add_and_update_do_not_dispatch_again() {
        let s = setup();
        let a1 = snap("a", "v1");
        let a2 = snap("a", "v2");
        s.client.set_log(a1.identity.clone(), MockLog::Follow(Vec::new()));

        s.reconciler.handle(WatchEvent::Added(a1.clone())).unwrap();
        s.reconciler.handle(modified(a1.clone(), a2.clone())).unwrap();

        // Same sequence again, e.g. after a relist
        assert_eq!(
            s.reconciler.handle(WatchEvent::Added(a1.clone())).unwrap(),
            Reconciliation::AlreadyActive
        );
        assert_eq!(
            s.reconciler.handle(modified(a1.clone(), a2)).unwrap(),
            Reconciliation::AlreadyActive
        );
        settle().await;
        assert_eq!(s.client.open_count(&a1.identity), 1);
    }

    #[tokio::test]
    async fn test_delete_clears_state_and_new_instance_dispatches() {
        let mut s = setup();
        let a1 = snap("a", "v1");
        let a2 = snap("a", "v2");
        s.client.set_log(a1.identity.clone(), MockLog::Follow(Vec::new()));

        let first = s.reconciler.handle(WatchEvent::Added(a1.clone())).unwrap();
        s.reconciler.handle(modified(a1.clone(), a2.clone())).unwrap();
        wait_until(|| s.client.open_count(&a1.identity) == 1).await;
        let deleted = s
            .reconciler
            .handle(WatchEvent::Deleted {
                snapshot: a2,
                final_state_unknown: false,
            })
            .unwrap();

        assert_eq!(deleted, Reconciliation::Removed);
        assert!(!s.registry.contains_key(&a1.identity));
        let report = next_report(&mut s.reports).await;
        assert!(matches!(report.outcome, ActionOutcome::Cancelled { .. }));
        assert_eq!(Reconciliation::Dispatched(report.action), first);

        // New pod reusing the name
        let mut replacement = snap("a", "v1");
        replacement.uid = Some("a-uid-2".to_string());
        let outcome = s.reconciler.handle(WatchEvent::Added(replacement.clone())).unwrap();

        assert!(matches!(outcome, Reconciliation::Dispatched(_)));
        assert_ne!(outcome, first);
        assert_eq!(s.registry.len(), 1);
        assert_eq!(
            s.registry.get(&a1.identity).unwrap().snapshot.uid.as_deref(),
            Some("a-uid-2")
        );
        wait_until(|| s.client.open_count(&a1.identity) == 2).await;
    }

    #[tokio::test]
    async fn test_unknown_final_state_is_settled_by_resync() {
        let s = setup();
        let a = snap("a", "v1");
        let b = snap("b", "v1");
        s.client.set_log(a.identity.clone(), MockLog::Follow(Vec::new()));
        s.client.set_log(b.identity.clone(), MockLog::Follow(Vec::new()));
        s.reconciler.handle(WatchEvent::Added(a.clone())).unwrap();
        s.reconciler.handle(WatchEvent::Added(b.clone())).unwrap();

        let outcome = s
            .reconciler
            .handle(WatchEvent::Deleted {
                snapshot: b.clone(),
                final_state_unknown: true,
            })
            .unwrap();
        assert_eq!(outcome, Reconciliation::MarkedStale);
        assert!(s.registry.get(&b.identity).unwrap().stale);
        assert!(s.dispatcher.is_active(&b.identity));

        let live: HashSet<_> = [a.identity.clone()].into_iter().collect();
        let outcome = s
            .reconciler
            .handle(WatchEvent::Resynced {
                namespace: TEST_NAMESPACE.to_string(),
                initial: false,
                live,
            })
            .unwrap();

        assert_eq!(
            outcome,
            Reconciliation::Resynced {
                initial: false,
                removed: 1
            }
        );
        assert!(!s.registry.contains_key(&b.identity));
        assert!(!s.dispatcher.is_active(&b.identity));
        assert!(s.dispatcher.is_active(&a.identity));
    }

    #[tokio::test]
    async fn test_malformed_updates_are_rejected() {
        let s = setup();
        let a = snap("a", "v1");
        let b = snap("b", "v1");

        let result = s.reconciler.handle(modified(a.clone(), b));
        assert!(matches!(result, Err(ControllerError::MalformedEvent(_))));

        let mut replaced = snap("a", "v2");
        replaced.uid = Some("other-uid".to_string());
        let result = s.reconciler.handle(modified(a.clone(), replaced));
        assert!(matches!(result, Err(ControllerError::MalformedEvent(_))));

        assert!(s.registry.is_empty());
        assert_eq!(s.dispatcher.active_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_of_other_instance_is_ignored() {
        let s = setup();
        let current = snap("a", "v1");
        s.client.set_log(current.identity.clone(), MockLog::Follow(Vec::new()));
        s.reconciler.handle(WatchEvent::Added(current.clone())).unwrap();

        let mut old_instance = snap("a", "v0");
        old_instance.uid = Some("old-uid".to_string());
        let outcome = s.reconciler.on_delete(old_instance, false);

        assert_eq!(outcome, Reconciliation::Ignored);
        assert!(s.registry.contains_key(&current.identity));
        assert!(s.dispatcher.is_active(&current.identity));
    }

    #[tokio::test]
    async fn test_failed_stream_is_retried_on_next_update() {
        let mut s = setup();
        let a1 = snap("a", "v1");
        let a2 = snap("a", "v2");
        s.client.set_log(a1.identity.clone(), MockLog::FailOpen("no container yet".to_string()));

        s.reconciler.handle(WatchEvent::Added(a1.clone())).unwrap();
        let report = next_report(&mut s.reports).await;
        assert!(matches!(report.outcome, ActionOutcome::OpenFailed(_)));
        assert!(!s.registry.contains_key(&a1.identity));

        s.client.set_log(a1.identity.clone(), MockLog::Complete(chunks(&["recovered\n"])));
        let outcome = s.reconciler.handle(modified(a1.clone(), a2)).unwrap();
        assert!(matches!(outcome, Reconciliation::Dispatched(_)));

        let report = next_report(&mut s.reports).await;
        assert!(matches!(report.outcome, ActionOutcome::Completed { .. }));
        assert_eq!(s.output.contents(), "recovered\n");
    }

    #[tokio::test]
    async fn test_resync_of_one_namespace_keeps_other_namespaces() {
        let s = setup();
        let dev = snap("a", "v1");
        let mut prod = snap("b", "v1");
        prod.identity = ResourceIdentity::new("prod", "b");
        s.client.set_log(dev.identity.clone(), MockLog::Follow(Vec::new()));
        s.client.set_log(prod.identity.clone(), MockLog::Follow(Vec::new()));

        s.reconciler.handle(WatchEvent::Added(dev.clone())).unwrap();
        s.reconciler
            .handle(WatchEvent::Resynced {
                namespace: TEST_NAMESPACE.to_string(),
                initial: true,
                live: [dev.identity.clone()].into_iter().collect(),
            })
            .unwrap();
        s.reconciler.handle(WatchEvent::Added(prod.clone())).unwrap();
        let outcome = s
            .reconciler
            .handle(WatchEvent::Resynced {
                namespace: "prod".to_string(),
                initial: true,
                live: [prod.identity.clone()].into_iter().collect(),
            })
            .unwrap();

        assert_eq!(
            outcome,
            Reconciliation::Resynced {
                initial: true,
                removed: 0
            }
        );
        assert!(s.registry.contains_key(&dev.identity));
        assert!(s.dispatcher.is_active(&dev.identity));

        // Later update of the dev pod must not start a second stream
        let outcome = s.reconciler.handle(modified(dev.clone(), snap("a", "v2"))).unwrap();
        assert_eq!(outcome, Reconciliation::AlreadyActive);
        settle().await;
        assert_eq!(s.client.open_count(&dev.identity), 1);
    }
}
