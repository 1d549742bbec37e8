use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::tenancy::error::GuardError;
use crate::tenancy::guard::{GuardKind, RequestGuard};

static SHARED: Lazy<Arc<PassthroughGuard>> = Lazy::new(|| Arc::new(PassthroughGuard));

/// Guard for engines that cannot enforce tenant scoping. Every call completes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughGuard;

impl PassthroughGuard {
    /// The process-wide instance; it is stateless, so every request can share it
    pub fn shared() -> Arc<dyn RequestGuard> {
        SHARED.clone()
    }
}

#[async_trait]
impl RequestGuard for PassthroughGuard {
    fn kind(&self) -> GuardKind {
        GuardKind::Passthrough
    }

    async fn ensure_read(&self, _cancel: &CancellationToken) -> Result<(), GuardError> {
        Ok(())
    }

    async fn ensure_write(&self, _cancel: &CancellationToken) -> Result<(), GuardError> {
        Ok(())
    }

    async fn finalize(&self, _cancel: &CancellationToken) -> Result<(), GuardError> {
        Ok(())
    }

    async fn abort(&self) -> Result<(), GuardError> {
        Ok(())
    }
}
