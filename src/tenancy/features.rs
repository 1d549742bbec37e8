use serde::Serialize;

use crate::config::TenancyConfig;

/// Runtime tenancy switches. Process-wide and read-only after startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TenantFeatureFlags {
    tenant_context_enabled: bool,
    rls_enabled: bool,
    write_guard_enabled: bool,
}

impl TenantFeatureFlags {
    pub fn new(tenant_context_enabled: bool, rls_enabled: bool, write_guard_enabled: bool) -> Self {
        Self {
            tenant_context_enabled,
            rls_enabled,
            write_guard_enabled,
        }
    }

    pub fn all_enabled() -> Self {
        Self::new(true, true, true)
    }

    pub fn from_config(config: &TenancyConfig) -> Self {
        Self::new(
            config.context_enabled,
            config.rls_enabled,
            config.write_guard_enabled,
        )
    }

    pub fn is_tenant_context_enabled(&self) -> bool {
        self.tenant_context_enabled
    }

    pub fn is_rls_enabled(&self) -> bool {
        self.rls_enabled
    }

    pub fn is_write_guard_enabled(&self) -> bool {
        self.write_guard_enabled
    }
}

/// Whether requests are scoped by tenant alone or by reseller group and tenant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum TenancyMode {
    #[default]
    SingleLevel,
    TwoLevel,
}

impl TenancyMode {
    pub fn from_config(config: &TenancyConfig) -> Self {
        if config.group_mode {
            TenancyMode::TwoLevel
        } else {
            TenancyMode::SingleLevel
        }
    }

    pub fn is_two_level(&self) -> bool {
        matches!(self, TenancyMode::TwoLevel)
    }
}
