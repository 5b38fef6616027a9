//! # Crash watcher.
//!
//! One watcher per run. It blocks on the run's completion channel and turns the
//! exit into an action:
//!
//! ```text
//! Stopped   ──► InstanceStopped                    (stop / stop_all / replacement)
//! Finished  ──► InstanceFinished, retire slot, status Stopped
//! Faulted   ──► InstanceFaulted
//!                 └─► write lock: generation still ours? take instance,
//!                     RestartState::on_fault(policy, uptime)
//!                       ├─ Suppressed ──► nothing (explicit stop won)
//!                       ├─ GiveUp     ──► "restart limit exceeded", status Crashed
//!                       └─ Retry      ──► pending = (generation, token)
//!                                         sleep(delay) | token.cancelled()
//!                                         prepare + install(Origin::Restart)
//!                                         setup failure counts as another fault
//!
//! The faulted run's sink stays open until the next run is set up; notices
//! after a failed restart setup go to a freshly opened sink.
//! ```
//!
//! `stop` sets `stopped_explicitly` and cancels the pending token under the
//! same write lock the watcher decides under, so an explicit stop always
//! suppresses the matching restart.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::core::instance::{InstanceExit, wait_exit};
use crate::core::registry::{PendingRestart, TenantSlot};
use crate::core::supervisor::{Origin, Supervisor};
use crate::error::{Fault, SetupError};
use crate::events::{Event, EventKind};
use crate::logs::{LogSink, Severity};
use crate::policies::{RestartDecision, RestartPolicy};
use crate::store::TenantStatus;
use crate::tenant::TenantId;

pub(crate) fn spawn(
    sup: Arc<Supervisor>,
    tenant: TenantId,
    generation: u64,
    done: watch::Receiver<Option<InstanceExit>>,
) {
    tokio::spawn(observe(sup, tenant, generation, done));
}

// Boxed: the restart path spawns the next watcher from inside this future.
fn observe(
    sup: Arc<Supervisor>,
    tenant: TenantId,
    generation: u64,
    mut done: watch::Receiver<Option<InstanceExit>>,
) -> BoxFuture<'static, ()> {
    async move {
        match wait_exit(&mut done).await {
            InstanceExit::Stopped => {
                sup.bus
                    .publish(Event::new(EventKind::InstanceStopped).with_tenant(&tenant));
            }
            InstanceExit::Finished { reason } => {
                tracing::info!(tenant = %tenant, %reason, "script finished");
                sup.bus.publish(
                    Event::new(EventKind::InstanceFinished)
                        .with_tenant(&tenant)
                        .with_reason(reason),
                );
                if retire(&sup, &tenant, generation).await {
                    sup.persist(&tenant, TenantStatus::Stopped).await;
                }
            }
            InstanceExit::Faulted(fault) => {
                tracing::warn!(tenant = %tenant, label = fault.as_label(), %fault, "instance faulted");
                sup.bus.publish(
                    Event::new(EventKind::InstanceFaulted)
                        .with_tenant(&tenant)
                        .with_reason(fault.to_string()),
                );
                recover(&sup, &tenant, generation, fault).await;
            }
        }
    }
    .boxed()
}

/// Removes a gracefully finished run from the registry.
async fn retire(sup: &Supervisor, tenant: &TenantId, generation: u64) -> bool {
    let mut slots = sup.registry.write().await;
    slots
        .get_mut(tenant)
        .and_then(|slot| slot.instance.take_if(|i| i.generation == generation))
        .is_some()
}

async fn recover(sup: &Supervisor, tenant: &TenantId, generation: u64, fault: Fault) {
    let policy = sup.cfg.restart;

    let (mut decision, mut pending, sink) = {
        let mut slots = sup.registry.write().await;
        let Some(slot) = slots.get_mut(tenant) else {
            return;
        };
        // Taken by stop / stop_all / a newer start: nothing to do here.
        let Some(instance) = slot.instance.take_if(|i| i.generation == generation) else {
            return;
        };
        let (decision, pending) = judge(slot, &policy, generation, instance.uptime());
        (decision, pending, Arc::clone(&instance.sink))
    };

    let mut sink: Option<Arc<dyn LogSink>> = Some(sink);
    let mut last_fault = fault.to_string();

    loop {
        match decision {
            RestartDecision::Suppressed => break,
            RestartDecision::GiveUp { failures } => {
                let line = format!(
                    "restart limit exceeded after {failures} consecutive faults; giving up"
                );
                tracing::error!(tenant = %tenant, failures, "restart limit exceeded");
                note(&sink, Severity::Error, &line);
                sup.bus.publish(
                    Event::new(EventKind::RestartLimitExceeded)
                        .with_tenant(tenant)
                        .with_attempt(failures)
                        .with_reason(last_fault.as_str()),
                );
                sup.persist(tenant, TenantStatus::Crashed).await;
                break;
            }
            RestartDecision::Retry { attempt, delay } => {
                let Some(token) = pending.take() else { break };
                tracing::info!(tenant = %tenant, attempt, ?delay, "auto-restart scheduled");
                note(
                    &sink,
                    Severity::Warn,
                    &format!(
                        "auto-restart in {}ms (attempt {attempt} of {})",
                        delay.as_millis(),
                        policy.max_failures
                    ),
                );
                sup.bus.publish(
                    Event::new(EventKind::RestartScheduled)
                        .with_tenant(tenant)
                        .with_attempt(attempt)
                        .with_delay(delay)
                        .with_reason(last_fault.as_str()),
                );

                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = token.cancelled() => break,
                }

                // The next run opens its own sink.
                if let Some(sink) = sink.take() {
                    sink.close();
                }
                match relaunch(sup, tenant, generation, attempt).await {
                    Ok(_) => return,
                    Err(err) => {
                        tracing::warn!(tenant = %tenant, attempt, label = err.as_label(), error = %err, "restart setup failed");
                        last_fault = format!("restart setup failed: {err}");
                        sink = sup.open_sink(tenant);
                        note(&sink, Severity::Error, &last_fault);
                        let mut slots = sup.registry.write().await;
                        let Some(slot) = slots.get_mut(tenant) else {
                            break;
                        };
                        if !slot.pending.as_ref().is_some_and(|p| p.is(generation)) {
                            break;
                        }
                        slot.pending = None;
                        (decision, pending) = judge(slot, &policy, generation, Duration::ZERO);
                    }
                }
            }
        }
    }

    if let Some(sink) = sink {
        sink.close();
    }
}

/// Records a fault in the slot's restart state; a `Retry` leaves a pending restart behind.
fn judge(
    slot: &mut TenantSlot,
    policy: &RestartPolicy,
    generation: u64,
    uptime: Duration,
) -> (RestartDecision, Option<CancellationToken>) {
    let decision = slot.restart.on_fault(policy, uptime);
    let pending = match decision {
        RestartDecision::Retry { .. } => {
            let pending = PendingRestart::new(generation);
            let token = pending.token.clone();
            slot.pending = Some(pending);
            Some(token)
        }
        _ => None,
    };
    (decision, pending)
}

/// Sets up and installs the next run. `Ok(false)` if the claim was lost meanwhile.
async fn relaunch(
    sup: &Supervisor,
    tenant: &TenantId,
    generation: u64,
    attempt: u32,
) -> Result<bool, SetupError> {
    let (source, bindings) = {
        let slots = sup.registry.read().await;
        match slots.get(tenant) {
            Some(slot) if slot.pending.as_ref().is_some_and(|p| p.is(generation)) => {
                match &slot.source {
                    Some(source) => (Arc::clone(source), slot.bindings.clone()),
                    None => return Ok(false),
                }
            }
            _ => return Ok(false),
        }
    };

    sup.bus.publish(
        Event::new(EventKind::InstanceStarting)
            .with_tenant(tenant)
            .with_attempt(attempt),
    );
    let prepared = sup.prepare(tenant, &bindings)?;
    Ok(sup
        .install(
            tenant,
            prepared,
            source,
            bindings,
            Origin::Restart {
                generation,
                attempt,
            },
        )
        .await)
}

fn note(sink: &Option<Arc<dyn LogSink>>, severity: Severity, line: &str) {
    if let Some(sink) = sink {
        sink.append(severity, line);
    }
}
