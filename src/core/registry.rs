//! # Tenant registry.
//!
//! One map behind one `RwLock`, keyed by tenant. A [`TenantSlot`] outlives every
//! single instance of its tenant: it keeps the restart bookkeeping, the cached
//! source, the metrics aggregator and a generation counter.
//!
//! ## Rules
//! - At most one instance per tenant (`slot.instance`).
//! - `generation` is bumped by every install; crash watchers and pending restarts
//!   carry the generation they belong to and abandon themselves on mismatch.
//! - Mutations (start, stop, restart-replace, crash handling) take the write lock;
//!   lookups (is-running, stats, routing) take the read lock. No lock is held
//!   across blocking per-instance work.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

use crate::core::instance::ScriptInstance;
use crate::engine::Bindings;
use crate::metrics::MetricsAggregator;
use crate::policies::RestartState;
use crate::tenant::TenantId;

/// A crash restart waiting out its backoff.
pub(crate) struct PendingRestart {
    pub generation: u64,
    pub token: CancellationToken,
}

impl PendingRestart {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            token: CancellationToken::new(),
        }
    }

    /// True if this is the live pending restart of `generation`.
    pub(crate) fn is(&self, generation: u64) -> bool {
        self.generation == generation && !self.token.is_cancelled()
    }
}

/// Everything the supervisor keeps about one tenant.
pub(crate) struct TenantSlot {
    pub instance: Option<ScriptInstance>,
    pub restart: RestartState,
    pub source: Option<Arc<str>>,
    pub bindings: Bindings,
    pub generation: u64,
    pub pending: Option<PendingRestart>,
    pub metrics: Arc<MetricsAggregator>,
}

impl TenantSlot {
    fn new(metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            instance: None,
            restart: RestartState::default(),
            source: None,
            bindings: Bindings::default(),
            generation: 0,
            pending: None,
            metrics,
        }
    }

    /// Registered instance whose lifecycle task is still alive.
    pub(crate) fn live(&self) -> Option<&ScriptInstance> {
        self.instance.as_ref().filter(|i| !i.has_exited())
    }

    /// Removes the instance and the pending restart (cancelling the latter).
    pub(crate) fn drain(&mut self) -> Option<ScriptInstance> {
        if let Some(pending) = self.pending.take() {
            pending.token.cancel();
        }
        self.instance.take()
    }
}

pub(crate) struct Registry {
    slots: RwLock<HashMap<TenantId, TenantSlot>>,
    bucket_interval: Duration,
    bucket_capacity: usize,
}

impl Registry {
    pub(crate) fn new(bucket_interval: Duration, bucket_capacity: usize) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            bucket_interval,
            bucket_capacity,
        }
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, HashMap<TenantId, TenantSlot>> {
        self.slots.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, HashMap<TenantId, TenantSlot>> {
        self.slots.write().await
    }

    /// Slot of `tenant`, created on first use.
    pub(crate) fn slot<'a>(
        &self,
        slots: &'a mut HashMap<TenantId, TenantSlot>,
        tenant: &TenantId,
    ) -> &'a mut TenantSlot {
        slots.entry(tenant.clone()).or_insert_with(|| {
            TenantSlot::new(Arc::new(MetricsAggregator::new(
                self.bucket_interval,
                self.bucket_capacity,
            )))
        })
    }

    /// Sorted tenants with a live instance.
    pub(crate) async fn running(&self) -> Vec<TenantId> {
        let slots = self.read().await;
        let mut tenants: Vec<TenantId> = slots
            .iter()
            .filter(|(_, slot)| slot.live().is_some())
            .map(|(tenant, _)| tenant.clone())
            .collect();
        tenants.sort_unstable();
        tenants
    }

    /// Takes every instance and pending restart out of the registry.
    pub(crate) async fn drain_all(&self) -> Vec<(TenantId, ScriptInstance)> {
        let mut slots = self.write().await;
        slots
            .iter_mut()
            .filter_map(|(tenant, slot)| slot.drain().map(|i| (tenant.clone(), i)))
            .collect()
    }
}
