//! Integration tests for start / stop / replacement / finish.

mod common;

use std::time::{Duration, Instant};

use common::{harness, next_event, tid};
use tenantvisor::{
    Bindings, EventKind, InstanceStatus, RouteRequest, RuntimeError, SupervisorConfig,
    TenantStatus,
};

const SERVICE: &str = "service.start(() => {})\nhook start ok\nhook shutdown ok\nroute GET /ping pong";

#[tokio::test]
async fn start_then_stop_is_fast() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");

    let began = Instant::now();
    h.sup.start(&t, SERVICE, Bindings::none()).await.unwrap();
    assert!(h.sup.is_running(&t).await);
    h.sup.stop(&t).await.unwrap();

    assert!(began.elapsed() < Duration::from_millis(200));
    assert!(!h.sup.is_running(&t).await);
    assert_eq!(h.store.status(&t).await, Some(TenantStatus::Stopped));
}

#[tokio::test]
async fn stop_runs_shutdown_hook_and_closes_log() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");
    let mut rx = h.sup.subscribe();

    h.sup.start(&t, SERVICE, Bindings::none()).await.unwrap();
    // Wait for the start hook so the instance is fully up.
    h.sup
        .handle_route(&t, RouteRequest::new("GET", "/ping"))
        .await
        .unwrap();
    h.sup.stop(&t).await.unwrap();
    next_event(&mut rx, EventKind::InstanceStopped, "alpha").await;

    assert_eq!(h.factory.journal.count(&t, "hook:start"), 1);
    assert_eq!(h.factory.journal.count(&t, "hook:shutdown"), 1);
    assert_eq!(h.logs.count_containing(&t, "instance stopped"), 1);
}

#[tokio::test]
async fn dropping_the_caller_does_not_stop_the_instance() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");

    let caller = tokio::spawn({
        let sup = h.sup.clone();
        let t = t.clone();
        async move {
            sup.start(&t, SERVICE, Bindings::none()).await.unwrap();
            std::future::pending::<()>().await;
        }
    });
    common::eventually("instance registered", || h.sup.is_running(&t)).await;

    caller.abort();
    let _ = caller.await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(h.sup.is_running(&t).await);
    let res = h
        .sup
        .handle_route(&t, RouteRequest::new("GET", "/ping"))
        .await
        .unwrap();
    assert_eq!(res.body, b"pong");
}

#[tokio::test]
async fn second_start_replaces_the_first() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");

    h.sup.start(&t, SERVICE, Bindings::none()).await.unwrap();
    h.sup
        .handle_route(&t, RouteRequest::new("GET", "/ping"))
        .await
        .unwrap();
    h.sup
        .start(&t, "route GET /ping v2", Bindings::none())
        .await
        .unwrap();

    let res = h
        .sup
        .handle_route(&t, RouteRequest::new("GET", "/ping"))
        .await
        .unwrap();
    assert_eq!(res.body, b"v2");
    assert_eq!(h.factory.journal.count(&t, "evaluate"), 2);
    assert_eq!(h.sup.tenants().await, vec![t]);
}

#[tokio::test]
async fn stop_unknown_tenant_is_not_running() {
    let h = harness(SupervisorConfig::default());
    let err = h.sup.stop(&tid("ghost")).await.unwrap_err();
    assert!(err.is_not_running());
    assert_eq!(err.as_label(), "runtime_not_running");
}

#[tokio::test]
async fn empty_source_is_rejected() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");
    let err = h.sup.start(&t, "  \n\t", Bindings::none()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::EmptySource { .. }));
    assert!(!h.sup.is_running(&t).await);
}

#[tokio::test]
async fn engine_construction_failure_registers_nothing() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");
    h.factory.refuse(&t);

    let err = h.sup.start(&t, SERVICE, Bindings::none()).await.unwrap_err();
    assert_eq!(err.as_label(), "runtime_setup_failed");
    assert!(err.to_string().contains("isolate pool exhausted"));
    assert!(!h.sup.is_running(&t).await);
    assert_eq!(h.store.status(&t).await, None);
}

#[tokio::test]
async fn module_bind_failure_is_a_setup_error() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");
    let bindings =
        Bindings::none().with_module(std::sync::Arc::new(common::NamedModule("forbidden")));

    let err = h.sup.start(&t, SERVICE, bindings).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Setup { .. }));
    assert!(err.to_string().contains("'forbidden'"));
    assert!(!h.sup.is_running(&t).await);
}

#[tokio::test]
async fn script_finishing_on_purpose_is_not_restarted() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");
    let mut rx = h.sup.subscribe();

    h.sup
        .start(&t, "hook start finish\nhook shutdown ok", Bindings::none())
        .await
        .unwrap();

    let ev = next_event(&mut rx, EventKind::InstanceFinished, "alpha").await;
    assert_eq!(ev.reason.as_deref(), Some("work done"));
    common::eventually("status persisted", || async {
        h.store.status(&t).await == Some(TenantStatus::Stopped)
    })
    .await;

    assert!(!h.sup.is_running(&t).await);
    assert_eq!(h.factory.journal.count(&t, "hook:shutdown"), 1);
    assert_eq!(h.factory.journal.count(&t, "evaluate"), 1);
    assert_eq!(h.logs.count_containing(&t, "script finished: work done"), 1);
}

#[tokio::test]
async fn failing_hooks_are_logged_but_keep_the_instance() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");
    let mut rx = h.sup.subscribe();

    h.sup
        .start(&t, "hook boot fail\nroute GET /ping pong", Bindings::none())
        .await
        .unwrap();

    let ev = next_event(&mut rx, EventKind::HookFailed, "alpha").await;
    assert!(ev.reason.as_deref().unwrap().starts_with("boot hook failed"));
    h.sup
        .handle_route(&t, RouteRequest::new("GET", "/ping"))
        .await
        .unwrap();
    assert_eq!(h.sup.stats(&t).await.unwrap().status, InstanceStatus::Running);
    assert_eq!(h.logs.count_containing(&t, "[ERROR] boot hook failed"), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_start_hook_times_out() {
    let h = harness(SupervisorConfig::default());
    let t = tid("alpha");
    let mut rx = h.sup.subscribe();

    h.sup
        .start(&t, "hook start slow\nroute GET /ping pong", Bindings::none())
        .await
        .unwrap();

    let ev = next_event(&mut rx, EventKind::HookTimedOut, "alpha").await;
    assert_eq!(ev.timeout_ms, Some(5_000));
    assert!(h.sup.is_running(&t).await);
    assert_eq!(h.logs.count_containing(&t, "start hook timed out after 5000ms"), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_shutdown_hook_is_bounded() {
    let cfg = SupervisorConfig {
        shutdown_timeout: Duration::from_secs(2),
        ..SupervisorConfig::default()
    };
    let h = harness(cfg);
    let t = tid("alpha");

    h.sup
        .start(&t, "hook shutdown slow", Bindings::none())
        .await
        .unwrap();
    common::eventually("running", || async {
        matches!(h.sup.stats(&t).await, Ok(s) if s.status == InstanceStatus::Running)
    })
    .await;

    let began = tokio::time::Instant::now();
    h.sup.stop(&t).await.unwrap();
    assert!(began.elapsed() <= Duration::from_secs(3));
    assert_eq!(h.logs.count_containing(&t, "shutdown hook timed out"), 1);
    assert!(!h.sup.is_running(&t).await);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let h = harness(SupervisorConfig::default());
    let good = tid("good");
    let bad = tid("bad");
    let mut rx = h.sup.subscribe();

    h.sup.start(&good, SERVICE, Bindings::none()).await.unwrap();
    h.sup
        .start(&bad, "throw ReferenceError: x is not defined", Bindings::none())
        .await
        .unwrap();

    next_event(&mut rx, EventKind::InstanceFaulted, "bad").await;

    let res = h
        .sup
        .handle_route(&good, RouteRequest::new("GET", "/ping"))
        .await
        .unwrap();
    assert_eq!(res.status, 200);
    assert!(h.logs.lines(&good).iter().all(|l| !l.contains("[ERROR]")));
    assert!(h.logs.count_containing(&bad, "unhandled fault: evaluation failed") >= 1);

    h.sup.stop(&bad).await.unwrap();
    assert!(h.sup.is_running(&good).await);
}

#[tokio::test]
async fn bound_modules_are_visible_to_the_script() {
    let mut modules = tenantvisor::ModuleRegistry::new();
    modules
        .register(std::sync::Arc::new(common::NamedModule("kv")))
        .unwrap();
    let h = common::harness_with(SupervisorConfig::default(), modules);
    let t = tid("alpha");
    let bindings = Bindings::none().with_module(std::sync::Arc::new(common::NamedModule("mail")));

    h.sup
        .start(&t, "require kv\nrequire mail\nroute GET /m modules", bindings)
        .await
        .unwrap();

    let res = h
        .sup
        .handle_route(&t, RouteRequest::new("GET", "/m"))
        .await
        .unwrap();
    assert_eq!(res.body, b"kv,mail");
    assert_eq!(h.sup.module_schemas().len(), 1);
}
