//! Integration tests for process-level operations: stop-all, boot auto-start, subscribers.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::{harness, next_event, tid, ToyFactory};
use tenantvisor::{
    Bindings, Event, EventKind, MemoryLogSinkFactory, RuntimeError, Subscribe, Supervisor,
    SupervisorConfig, TenantStatus,
};

#[tokio::test]
async fn stop_all_stops_everything_and_keeps_persisted_status() {
    let h = harness(SupervisorConfig::default());
    let tenants = [tid("a"), tid("b"), tid("c")];
    let mut rx = h.sup.subscribe();

    for t in &tenants {
        h.sup
            .start(t, "hook shutdown ok\nroute GET / hi", Bindings::none())
            .await
            .unwrap();
    }
    assert_eq!(h.sup.tenants().await, tenants.to_vec());

    h.sup.stop_all().await.unwrap();

    let mut all_within = false;
    while let Ok(ev) = rx.try_recv() {
        all_within |= ev.kind == EventKind::AllStoppedWithin;
    }
    assert!(all_within);
    for t in &tenants {
        assert!(!h.sup.is_running(t).await);
        assert_eq!(h.store.status(t).await, Some(TenantStatus::Running));
    }
    assert!(h.sup.tenants().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_all_aborts_instances_beyond_grace() {
    let cfg = SupervisorConfig {
        shutdown_timeout: Duration::ZERO,
        grace: Duration::from_secs(1),
        ..SupervisorConfig::default()
    };
    let h = harness(cfg);
    let quick = tid("quick");
    let stuck = tid("stuck");
    let mut rx = h.sup.subscribe();

    h.sup
        .start(&quick, "hook shutdown ok", Bindings::none())
        .await
        .unwrap();
    h.sup
        .start(&stuck, "hook shutdown slow", Bindings::none())
        .await
        .unwrap();
    common::eventually("both evaluated", || async {
        h.factory.journal.count(&quick, "evaluate") == 1
            && h.factory.journal.count(&stuck, "evaluate") == 1
    })
    .await;

    let err = h.sup.stop_all().await.unwrap_err();
    match err {
        RuntimeError::GraceExceeded { grace, stuck: names } => {
            assert_eq!(grace, Duration::from_secs(1));
            assert_eq!(names, vec![stuck.clone()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let mut reason = None;
    while let Ok(ev) = rx.try_recv() {
        if ev.kind == EventKind::GraceExceeded {
            reason = ev.reason.map(|r| r.to_string());
        }
    }
    assert_eq!(reason.as_deref(), Some("stuck"));
    assert!(!h.sup.is_running(&stuck).await);
}

#[tokio::test]
async fn auto_start_resumes_running_tenants() {
    let h = harness(SupervisorConfig::default());
    h.store
        .put(tid("alpha"), "route GET / a", TenantStatus::Running)
        .await;
    h.store.put(tid("beta"), "   ", TenantStatus::Running).await;
    h.store
        .put(tid("gamma"), "route GET / g", TenantStatus::Stopped)
        .await;
    h.store
        .put(tid("delta"), "route GET / d", TenantStatus::Crashed)
        .await;

    let report = h.sup.auto_start_all().await.unwrap();

    assert_eq!(report.started, vec![tid("alpha")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tenant, tid("beta"));
    assert_eq!(report.failed[0].label, "runtime_empty_source");
    assert!(h.sup.is_running(&tid("alpha")).await);
    assert!(!h.sup.is_running(&tid("gamma")).await);
    assert!(!h.sup.is_running(&tid("delta")).await);
}

#[tokio::test]
async fn auto_start_then_shutdown_round_trips_through_the_store() {
    let h = harness(SupervisorConfig::default());
    h.store
        .put(tid("alpha"), "route GET / a", TenantStatus::Running)
        .await;

    h.sup.auto_start_all().await.unwrap();
    h.sup.shutdown().await.unwrap();

    // A fresh supervisor over the same store resumes the tenant.
    let next = Supervisor::builder(SupervisorConfig::default(), Arc::new(ToyFactory::default()))
        .with_log_sinks(Arc::new(MemoryLogSinkFactory::new()))
        .with_store(Arc::new(h.store.clone()))
        .build();
    let report = next.auto_start_all().await.unwrap();
    assert_eq!(report.started, vec![tid("alpha")]);
    assert!(next.is_running(&tid("alpha")).await);
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(EventKind, Option<String>)>>,
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.seen
            .lock()
            .unwrap()
            .push((event.kind, event.tenant.as_deref().map(str::to_string)));
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn subscribers_receive_lifecycle_events() {
    let recorder = Arc::new(Recorder::default());
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![recorder.clone()];
    let sup = Supervisor::builder(SupervisorConfig::default(), Arc::new(ToyFactory::default()))
        .with_log_sinks(Arc::new(MemoryLogSinkFactory::new()))
        .with_subscribers(subscribers)
        .build();
    let t = tid("alpha");
    let mut rx = sup.subscribe();

    sup.start(&t, "route GET / a", Bindings::none()).await.unwrap();
    sup.stop(&t).await.unwrap();
    next_event(&mut rx, EventKind::InstanceStopped, "alpha").await;

    common::eventually("recorder saw the stop", || async {
        recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .any(|(kind, _)| *kind == EventKind::InstanceStopped)
    })
    .await;

    let seen = recorder.seen.lock().unwrap().clone();
    let kinds: Vec<EventKind> = seen.iter().map(|(k, _)| *k).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::InstanceStarting,
            EventKind::InstanceStarted,
            EventKind::InstanceStopped
        ]
    );
    assert!(seen.iter().all(|(_, tenant)| tenant.as_deref() == Some("alpha")));
}
