//! Tenant directory trait and a static implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use common::TenantId;

use crate::error::OrchestratorError;

/// Trait for the directory of active tenant partitions.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Lists the tenants currently active on the platform.
    async fn list_active_tenant_ids(&self) -> Result<Vec<TenantId>, OrchestratorError>;
}

/// Tenant directory backed by a fixed list, for tests and single-tenant
/// deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantDirectory {
    tenants: Arc<RwLock<Vec<TenantId>>>,
}

impl StaticTenantDirectory {
    /// Creates a directory with the given tenants.
    pub fn new(tenants: Vec<TenantId>) -> Self {
        Self {
            tenants: Arc::new(RwLock::new(tenants)),
        }
    }
}

#[async_trait]
impl TenantDirectory for StaticTenantDirectory {
    async fn list_active_tenant_ids(&self) -> Result<Vec<TenantId>, OrchestratorError> {
        Ok(self.tenants.read().unwrap().clone())
    }
}
