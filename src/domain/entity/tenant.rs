//! Current-tenant accessors

use std::future::Future;

use super::record::TenantId;

#[cfg(test)]
use mockall::automock;

/// Read-only view of the tenant the current operation runs for
#[cfg_attr(test, automock)]
pub trait TenantContext: Send + Sync {
    /// The current tenant, or `None` for system-level operations
    fn current_tenant(&self) -> Option<TenantId>;
}

/// Always the same tenant; handy for workers bound to one customer
#[derive(Debug, Clone, Copy)]
pub struct FixedTenant(pub TenantId);

impl TenantContext for FixedTenant {
    fn current_tenant(&self) -> Option<TenantId> {
        Some(self.0)
    }
}

/// No tenant: queries see every tenant
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemContext;

impl TenantContext for SystemContext {
    fn current_tenant(&self) -> Option<TenantId> {
        None
    }
}

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Tenant bound per task, so concurrent requests each see their own
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalTenant;

impl TaskLocalTenant {
    /// Runs `fut` with `tenant` as the current tenant
    pub async fn scope<F: Future>(tenant: TenantId, fut: F) -> F::Output {
        CURRENT_TENANT.scope(tenant, fut).await
    }
}

impl TenantContext for TaskLocalTenant {
    fn current_tenant(&self) -> Option<TenantId> {
        CURRENT_TENANT.try_with(|tenant| *tenant).ok()
    }
}
