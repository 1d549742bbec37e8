use thiserror::Error;

use crate::database::manager::DatabaseError;

/// Errors raised by request guards and the interceptors that drive them
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Required tenant context is not present")]
    MissingTenant,

    #[error("Required group context is not present")]
    MissingGroup,

    #[error("Tenant context is enabled but the request scope carries no TenantContext")]
    MissingTenantContext,

    #[error("No request guard is installed for the current task")]
    NoAmbientGuard,

    #[error("Request guard has already been disposed")]
    Disposed,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl GuardError {
    /// Programming or wiring mistakes. These are never retried and abort the request.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GuardError::MissingTenant
                | GuardError::MissingGroup
                | GuardError::MissingTenantContext
                | GuardError::NoAmbientGuard
                | GuardError::Disposed
        )
    }
}
