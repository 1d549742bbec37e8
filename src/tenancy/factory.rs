use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::AppConfig;
use crate::database::manager::DatabaseError;
use crate::database::provider::DatabaseCapability;
use crate::database::session::DbSession;
use crate::interceptor::{
    InterceptorBox, InterceptorPipeline, TransactionUsageInterceptor, WritePromotionInterceptor,
};
use crate::tenancy::context::TenantContext;
use crate::tenancy::error::GuardError;
use crate::tenancy::features::{TenancyMode, TenantFeatureFlags};
use crate::tenancy::guard::{RequestGuard, TransactionGuard};
use crate::tenancy::passthrough::PassthroughGuard;
use crate::tenancy::variables::SessionVariableSetter;

/// What a request hands the factory: its session and, once resolved, its tenant
#[derive(Clone)]
pub struct RequestScope {
    pub session: Arc<dyn DbSession>,
    pub tenant: Option<TenantContext>,
}

impl RequestScope {
    pub fn new(session: Arc<dyn DbSession>, tenant: Option<TenantContext>) -> Self {
        Self { session, tenant }
    }
}

/// Decides, once per request, which guard and which interceptors the request gets.
/// Nothing else looks at the feature flags or the engine capability.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GuardFactory {
    features: TenantFeatureFlags,
    capability: DatabaseCapability,
    mode: TenancyMode,
}

impl GuardFactory {
    pub fn new(features: TenantFeatureFlags, capability: DatabaseCapability, mode: TenancyMode) -> Self {
        Self {
            features,
            capability,
            mode,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, DatabaseError> {
        let capability = DatabaseCapability::from_name(&config.database.provider)?;
        Ok(Self::new(
            TenantFeatureFlags::from_config(&config.tenancy),
            capability,
            TenancyMode::from_config(&config.tenancy),
        ))
    }

    pub fn features(&self) -> TenantFeatureFlags {
        self.features
    }

    pub fn capability(&self) -> DatabaseCapability {
        self.capability
    }

    pub fn mode(&self) -> TenancyMode {
        self.mode
    }

    /// Tenant context is propagated only when switched on and the engine can carry it
    pub fn uses_tenant_context(&self) -> bool {
        self.features.is_tenant_context_enabled() && self.capability.supports_tenant_context
    }

    pub fn promotes_on_save(&self) -> bool {
        self.uses_tenant_context() && self.features.is_write_guard_enabled()
    }

    pub fn stamps_attached_transactions(&self) -> bool {
        self.uses_tenant_context()
            && self.features.is_rls_enabled()
            && self.capability.supports_row_level_security
    }

    pub fn create_guard(&self, scope: &RequestScope) -> Result<Arc<dyn RequestGuard>, GuardError> {
        if !self.uses_tenant_context() {
            debug!("Tenant context inactive for {}; using passthrough guard", self.capability.provider);
            return Ok(PassthroughGuard::shared());
        }

        let tenant = scope.tenant.clone().ok_or(GuardError::MissingTenantContext)?;
        Ok(Arc::new(TransactionGuard::new(
            scope.session.clone(),
            tenant,
            SessionVariableSetter::new(self.mode),
        )))
    }

    /// Interceptors for one request's session
    pub fn interceptors_for(&self, tenant: Option<&TenantContext>) -> Result<InterceptorPipeline, GuardError> {
        let mut pipeline = InterceptorPipeline::new();

        if self.promotes_on_save() {
            pipeline.register(InterceptorBox::SaveChanges(Box::new(WritePromotionInterceptor)));
        }

        if self.stamps_attached_transactions() {
            let tenant = tenant.cloned().ok_or(GuardError::MissingTenantContext)?;
            pipeline.register(InterceptorBox::Transaction(Box::new(
                TransactionUsageInterceptor::new(tenant, SessionVariableSetter::new(self.mode)),
            )));
        }

        Ok(pipeline)
    }
}
