use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::database::session::{DbSession, TransactionId};
use crate::interceptor::traits::{InterceptorBox, SaveChangesInterceptor, TransactionInterceptor};
use crate::tenancy::GuardError;

/// Per-session interceptor registry.
/// Hooks run in priority order and the first failure stops the operation that fired them.
#[derive(Default)]
pub struct InterceptorPipeline {
    save_changes: Vec<Box<dyn SaveChangesInterceptor>>,
    transaction: Vec<Box<dyn TransactionInterceptor>>,
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, interceptor: InterceptorBox) {
        let name = interceptor.name();
        match interceptor {
            InterceptorBox::SaveChanges(i) => {
                self.save_changes.push(i);
                self.save_changes.sort_by_key(|i| i.priority());
            }
            InterceptorBox::Transaction(i) => {
                self.transaction.push(i);
                self.transaction.sort_by_key(|i| i.priority());
            }
        }
        tracing::debug!("Registered interceptor '{}'", name);
    }

    pub fn is_empty(&self) -> bool {
        self.save_changes.is_empty() && self.transaction.is_empty()
    }

    /// Registered interceptor names, save-changes hooks first
    pub fn names(&self) -> Vec<&'static str> {
        self.save_changes
            .iter()
            .map(|i| i.name())
            .chain(self.transaction.iter().map(|i| i.name()))
            .collect()
    }

    pub async fn saving_changes(&self, session: &dyn DbSession, cancel: &CancellationToken) -> Result<(), GuardError> {
        for interceptor in &self.save_changes {
            let started = Instant::now();
            interceptor.saving_changes(session, cancel).await.map_err(|e| {
                tracing::warn!("Interceptor: {} failed before save: {}", interceptor.name(), e);
                e
            })?;
            tracing::debug!("Interceptor: {} ran before save in {:?}", interceptor.name(), started.elapsed());
        }
        Ok(())
    }

    pub async fn transaction_used(
        &self,
        session: &dyn DbSession,
        tx: TransactionId,
        cancel: &CancellationToken,
    ) -> Result<(), GuardError> {
        for interceptor in &self.transaction {
            interceptor.transaction_used(session, tx, cancel).await.map_err(|e| {
                tracing::warn!("Interceptor: {} failed on {}: {}", interceptor.name(), tx, e);
                e
            })?;
            tracing::debug!("Interceptor: {} ran on {}", interceptor.name(), tx);
        }
        Ok(())
    }
}
