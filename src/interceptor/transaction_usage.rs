use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::database::session::{DbSession, TransactionId};
use crate::interceptor::traits::{Interceptor, TransactionInterceptor};
use crate::tenancy::{GuardError, SessionVariableSetter, TenantContext};

/// Stamps tenant variables on transactions that were opened without going through the guard
pub struct TransactionUsageInterceptor {
    tenant: TenantContext,
    setter: SessionVariableSetter,
}

impl TransactionUsageInterceptor {
    pub fn new(tenant: TenantContext, setter: SessionVariableSetter) -> Self {
        Self { tenant, setter }
    }
}

impl Interceptor for TransactionUsageInterceptor {
    fn name(&self) -> &'static str {
        "transaction_usage"
    }
}

#[async_trait]
impl TransactionInterceptor for TransactionUsageInterceptor {
    async fn transaction_used(
        &self,
        session: &dyn DbSession,
        tx: TransactionId,
        cancel: &CancellationToken,
    ) -> Result<(), GuardError> {
        if !session.is_open() {
            tracing::debug!("Skipping tenant stamp on {}: connection closed", tx);
            return Ok(());
        }
        if session.current_transaction().await != Some(tx) {
            tracing::debug!("Skipping tenant stamp on {}: no longer attached", tx);
            return Ok(());
        }

        self.setter.apply(session, &self.tenant, cancel).await
    }
}
