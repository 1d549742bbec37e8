use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenancy::error::GuardError;

/// The tenant a request was resolved to.
///
/// Built once per request by a [`TenantResolver`](crate::middleware::tenant::TenantResolver)
/// and never changed afterwards. `hostname` and `subdomain` are kept for resolution audit
/// only; the guard reads nothing but the ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    tenant_id: Option<Uuid>,
    group_id: Option<Uuid>,
    user_tenant_id: Option<Uuid>,
    hostname: Option<String>,
    subdomain: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    /// A context whose tenant was never resolved
    pub fn unresolved() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Tenant id carried by the authenticated user, when it differs from the resolved one
    pub fn with_user_tenant(mut self, user_tenant_id: Uuid) -> Self {
        self.user_tenant_id = Some(user_tenant_id);
        self
    }

    /// Record the request host. The first label becomes the subdomain when the host has one.
    pub fn with_host(mut self, host: &str) -> Self {
        let hostname = host.split(':').next().unwrap_or(host).trim().to_ascii_lowercase();
        if hostname.is_empty() {
            return self;
        }

        let labels: Vec<&str> = hostname.split('.').collect();
        if labels.len() > 2 {
            self.subdomain = Some(labels[0].to_string());
        }
        self.hostname = Some(hostname);
        self
    }

    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tenant_id
    }

    pub fn group_id(&self) -> Option<Uuid> {
        self.group_id
    }

    pub fn user_tenant_id(&self) -> Option<Uuid> {
        self.user_tenant_id
    }

    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    pub fn subdomain(&self) -> Option<&str> {
        self.subdomain.as_deref()
    }

    /// The resolved tenant id. Absent and nil ids are both unresolved.
    pub fn require_tenant_id(&self) -> Result<Uuid, GuardError> {
        self.tenant_id
            .filter(|id| !id.is_nil())
            .ok_or(GuardError::MissingTenant)
    }

    pub fn require_group_id(&self) -> Result<Uuid, GuardError> {
        self.group_id
            .filter(|id| !id.is_nil())
            .ok_or(GuardError::MissingGroup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_tenant_is_unresolved() {
        assert!(matches!(
            TenantContext::new(Uuid::nil()).require_tenant_id(),
            Err(GuardError::MissingTenant)
        ));
        assert!(matches!(
            TenantContext::unresolved().require_tenant_id(),
            Err(GuardError::MissingTenant)
        ));

        let id = Uuid::new_v4();
        assert_eq!(TenantContext::new(id).require_tenant_id().unwrap(), id);
    }

    #[test]
    fn group_is_required_separately() {
        let ctx = TenantContext::new(Uuid::new_v4());
        assert!(matches!(ctx.require_group_id(), Err(GuardError::MissingGroup)));

        let group = Uuid::new_v4();
        assert_eq!(ctx.with_group(group).require_group_id().unwrap(), group);
    }

    #[test]
    fn host_records_subdomain() {
        let ctx = TenantContext::new(Uuid::new_v4()).with_host("Acme.corp.example.com:8443");
        assert_eq!(ctx.hostname(), Some("acme.corp.example.com"));
        assert_eq!(ctx.subdomain(), Some("acme"));

        let bare = TenantContext::new(Uuid::new_v4()).with_host("localhost:3000");
        assert_eq!(bare.hostname(), Some("localhost"));
        assert_eq!(bare.subdomain(), None);
    }
}
