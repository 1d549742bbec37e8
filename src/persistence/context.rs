use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::database::session::{DbSession, Statement};
use crate::tenancy::cancel::cancellable;
use crate::tenancy::{ambient, GuardError};

/// Unit of work over one request's session.
///
/// Writes are queued with [`add`](DataContext::add) and only reach the database on
/// [`save_changes`](DataContext::save_changes), after the session's pre-save
/// interceptors have run.
pub struct DataContext {
    session: Arc<dyn DbSession>,
    pending: Vec<Statement>,
}

impl DataContext {
    pub fn new(session: Arc<dyn DbSession>) -> Self {
        Self {
            session,
            pending: Vec::new(),
        }
    }

    pub fn session(&self) -> &Arc<dyn DbSession> {
        &self.session
    }

    pub fn add(&mut self, statement: Statement) {
        self.pending.push(statement);
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Run a read through the session, opening the request's read transaction first
    pub async fn query(&self, statement: &Statement, cancel: &CancellationToken) -> Result<Vec<Value>, GuardError> {
        ambient::current()?.ensure_read(cancel).await?;
        cancellable(cancel, self.session.fetch_json(statement)).await
    }

    /// Flush queued writes, returning the number of affected rows.
    /// Each statement leaves the queue once it has run, so after a failure only the
    /// statements that never reached the database are left for a retry.
    pub async fn save_changes(&mut self, cancel: &CancellationToken) -> Result<u64, GuardError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        self.session
            .interceptors()
            .saving_changes(self.session.as_ref(), cancel)
            .await?;

        let queued = self.pending.len();
        let mut affected = 0;
        while let Some(statement) = self.pending.first() {
            affected += cancellable(cancel, self.session.execute(statement)).await?;
            self.pending.remove(0);
        }

        debug!("Saved {} statements ({} rows)", queued, affected);
        Ok(affected)
    }
}
