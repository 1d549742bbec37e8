use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::database::session::{DbSession, TransactionId};
use crate::tenancy::GuardError;

/// Base trait for all persistence interceptors
pub trait Interceptor: Send + Sync {
    /// Interceptor name for logging and debugging
    fn name(&self) -> &'static str;

    /// Lower numbers run first
    fn priority(&self) -> u8 {
        50
    }
}

/// Fired before a unit of work sends its pending writes
#[async_trait]
pub trait SaveChangesInterceptor: Interceptor {
    async fn saving_changes(&self, session: &dyn DbSession, cancel: &CancellationToken) -> Result<(), GuardError>;
}

/// Fired after a transaction opened outside the guard is attached to a session
#[async_trait]
pub trait TransactionInterceptor: Interceptor {
    async fn transaction_used(
        &self,
        session: &dyn DbSession,
        tx: TransactionId,
        cancel: &CancellationToken,
    ) -> Result<(), GuardError>;
}

/// Interceptors grouped by the hook they attach to
pub enum InterceptorBox {
    SaveChanges(Box<dyn SaveChangesInterceptor>),
    Transaction(Box<dyn TransactionInterceptor>),
}

impl InterceptorBox {
    pub fn name(&self) -> &'static str {
        match self {
            InterceptorBox::SaveChanges(i) => i.name(),
            InterceptorBox::Transaction(i) => i.name(),
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            InterceptorBox::SaveChanges(i) => i.priority(),
            InterceptorBox::Transaction(i) => i.priority(),
        }
    }
}
