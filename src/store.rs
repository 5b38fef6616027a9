//! # Persisted tenant sources and run status.
//!
//! The supervisor needs exactly two things persisted to survive a host restart:
//! the source to run and whether the tenant was meant to be running.
//! [`SourceStore`] is that seam; [`MemorySourceStore`] is the in-process backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::tenant::TenantId;

/// Persisted run status of a tenant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    /// Should be running; auto-started at boot.
    Running,
    /// Stopped by an operator or by the script itself.
    Stopped,
    /// Gave up after repeated faults.
    Crashed,
}

/// Storage for tenant sources and their persisted status.
#[async_trait]
pub trait SourceStore: Send + Sync + 'static {
    /// Loads the deployed source for `tenant`.
    async fn load(&self, tenant: &TenantId) -> Result<String, StoreError>;

    /// Tenants whose persisted status is [`TenantStatus::Running`], sorted.
    async fn running_tenants(&self) -> Result<Vec<TenantId>, StoreError>;

    /// Persists `status` for `tenant`.
    async fn set_status(&self, tenant: &TenantId, status: TenantStatus) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct Record {
    source: Option<String>,
    status: TenantStatus,
}

/// In-memory [`SourceStore`].
#[derive(Debug, Default, Clone)]
pub struct MemorySourceStore {
    records: Arc<RwLock<BTreeMap<TenantId, Record>>>,
}

impl MemorySourceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves (or replaces) a tenant's source with the given status.
    pub async fn put(&self, tenant: TenantId, source: impl Into<String>, status: TenantStatus) {
        self.records.write().await.insert(
            tenant,
            Record {
                source: Some(source.into()),
                status,
            },
        );
    }

    /// Persisted status, if the tenant is known.
    pub async fn status(&self, tenant: &TenantId) -> Option<TenantStatus> {
        self.records.read().await.get(tenant).map(|r| r.status)
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn load(&self, tenant: &TenantId) -> Result<String, StoreError> {
        self.records
            .read()
            .await
            .get(tenant)
            .and_then(|r| r.source.clone())
            .ok_or_else(|| StoreError::NotFound(tenant.clone()))
    }

    async fn running_tenants(&self) -> Result<Vec<TenantId>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.status == TenantStatus::Running)
            .map(|(t, _)| t.clone())
            .collect())
    }

    async fn set_status(&self, tenant: &TenantId, status: TenantStatus) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .entry(tenant.clone())
            .and_modify(|r| r.status = status)
            .or_insert(Record {
                source: None,
                status,
            });
        Ok(())
    }
}
