use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::database::session::{DbSession, Statement, TransactionId};
use crate::tenancy::cancel::cancellable;
use crate::tenancy::context::TenantContext;
use crate::tenancy::error::GuardError;
use crate::tenancy::variables::{self, SessionVariableSetter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GuardKind {
    Transactional,
    Passthrough,
}

/// Kind of transaction a guard currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransactionMode {
    None,
    ReadOnly,
    Write,
}

/// The per-request guard contract.
///
/// Business code and interceptors call `ensure_read` before reading and `ensure_write`
/// before writing; the request layer calls `finalize` (or `abort` on failure) exactly
/// once when the request is done. Both ensure calls are idempotent.
#[async_trait]
pub trait RequestGuard: Send + Sync {
    fn kind(&self) -> GuardKind;

    async fn ensure_read(&self, cancel: &CancellationToken) -> Result<(), GuardError>;

    async fn ensure_write(&self, cancel: &CancellationToken) -> Result<(), GuardError>;

    /// Commit whatever is open and dispose the guard
    async fn finalize(&self, cancel: &CancellationToken) -> Result<(), GuardError>;

    /// Roll back whatever is open and dispose the guard
    async fn abort(&self) -> Result<(), GuardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    Idle,
    ReadOnly(TransactionId),
    Write(TransactionId),
    Finalized,
}

impl GuardState {
    fn mode(&self) -> TransactionMode {
        match self {
            GuardState::ReadOnly(_) => TransactionMode::ReadOnly,
            GuardState::Write(_) => TransactionMode::Write,
            GuardState::Idle | GuardState::Finalized => TransactionMode::None,
        }
    }

    fn transaction(&self) -> Option<TransactionId> {
        match self {
            GuardState::ReadOnly(tx) | GuardState::Write(tx) => Some(*tx),
            GuardState::Idle | GuardState::Finalized => None,
        }
    }
}

/// Lazily opened, promotable transaction for one request.
///
/// Starts with no transaction. `ensure_read` opens a read-only one, `ensure_write`
/// opens a write one or replaces the read-only one. Each new transaction is stamped
/// with the tenant session variables before anything else runs on it.
pub struct TransactionGuard {
    session: Arc<dyn DbSession>,
    tenant: TenantContext,
    setter: SessionVariableSetter,
    // Only ever locked by the owning request; the lock makes the guard shareable
    // through the ambient slot and serialises nested callers.
    state: Mutex<GuardState>,
}

impl TransactionGuard {
    pub fn new(session: Arc<dyn DbSession>, tenant: TenantContext, setter: SessionVariableSetter) -> Self {
        Self {
            session,
            tenant,
            setter,
            state: Mutex::new(GuardState::Idle),
        }
    }

    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    pub async fn mode(&self) -> TransactionMode {
        self.state.lock().await.mode()
    }

    pub async fn has_transaction(&self) -> bool {
        self.state.lock().await.transaction().is_some()
    }

    pub async fn is_disposed(&self) -> bool {
        matches!(*self.state.lock().await, GuardState::Finalized)
    }

    /// Begin a transaction and stamp it. Anything that fails after the begin rolls the
    /// new transaction back, so the caller never sees a half-prepared one.
    async fn open(
        &self,
        statements: &[Statement],
        read_only: bool,
        cancel: &CancellationToken,
    ) -> Result<TransactionId, GuardError> {
        let tx = cancellable(cancel, self.session.begin()).await?;

        let prepared = async {
            variables::run(self.session.as_ref(), statements, cancel).await?;
            if read_only {
                cancellable(cancel, self.session.execute(&Statement::new("SET TRANSACTION READ ONLY"))).await?;
            }
            Ok::<(), GuardError>(())
        }
        .await;

        if let Err(err) = prepared {
            warn!("Discarding {} after failed setup: {}", tx, err);
            if let Err(secondary) = self.session.rollback(tx).await {
                warn!("Rollback of {} failed: {}", tx, secondary);
            }
            return Err(err);
        }

        Ok(tx)
    }

    /// State to keep after closing `tx` was interrupted
    async fn settle(&self, tx: TransactionId, held: GuardState) -> GuardState {
        if self.session.current_transaction().await == Some(tx) {
            held
        } else {
            GuardState::Idle
        }
    }
}

#[async_trait]
impl RequestGuard for TransactionGuard {
    fn kind(&self) -> GuardKind {
        GuardKind::Transactional
    }

    async fn ensure_read(&self, cancel: &CancellationToken) -> Result<(), GuardError> {
        let mut state = self.state.lock().await;
        match *state {
            GuardState::Finalized => Err(GuardError::Disposed),
            GuardState::ReadOnly(_) | GuardState::Write(_) => Ok(()),
            GuardState::Idle => {
                let statements = self.setter.statements(&self.tenant)?;
                let tx = self.open(&statements, true, cancel).await?;
                *state = GuardState::ReadOnly(tx);
                debug!("Guard opened read-only {}", tx);
                Ok(())
            }
        }
    }

    async fn ensure_write(&self, cancel: &CancellationToken) -> Result<(), GuardError> {
        let mut state = self.state.lock().await;
        match *state {
            GuardState::Finalized => Err(GuardError::Disposed),
            GuardState::Write(_) => Ok(()),
            GuardState::ReadOnly(read_tx) => {
                let statements = self.setter.statements(&self.tenant)?;

                if let Err(err) = cancellable(cancel, self.session.rollback(read_tx)).await {
                    *state = self.settle(read_tx, *state).await;
                    return Err(err);
                }
                *state = GuardState::Idle;

                let tx = self.open(&statements, false, cancel).await?;
                *state = GuardState::Write(tx);
                debug!("Guard promoted {} to write {}", read_tx, tx);
                Ok(())
            }
            GuardState::Idle => {
                let statements = self.setter.statements(&self.tenant)?;
                let tx = self.open(&statements, false, cancel).await?;
                *state = GuardState::Write(tx);
                debug!("Guard opened write {}", tx);
                Ok(())
            }
        }
    }

    async fn finalize(&self, cancel: &CancellationToken) -> Result<(), GuardError> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, GuardState::Finalized);

        let Some(tx) = previous.transaction() else {
            return Ok(());
        };

        match cancellable(cancel, self.session.commit(tx)).await {
            Ok(()) => {
                debug!("Guard committed {}", tx);
                Ok(())
            }
            Err(err) => {
                error!("Commit of {} failed: {}", tx, err);
                if let Err(secondary) = self.session.rollback(tx).await {
                    warn!("Rollback after failed commit of {} also failed: {}", tx, secondary);
                }
                Err(err)
            }
        }
    }

    async fn abort(&self) -> Result<(), GuardError> {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, GuardState::Finalized);

        match previous.transaction() {
            Some(tx) => {
                debug!("Guard rolling back {}", tx);
                self.session.rollback(tx).await.map_err(GuardError::from)
            }
            None => Ok(()),
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state != GuardState::Finalized {
            warn!(
                "Request guard dropped without finalize (mode {:?}); the session will roll back",
                state.mode()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{FaultPoint, MemoryDatabase};
    use crate::database::session::SqlValue;
    use crate::interceptor::InterceptorPipeline;
    use crate::tenancy::features::TenancyMode;
    use std::time::Duration;
    use uuid::Uuid;

    fn guard_on(db: &MemoryDatabase, tenant: TenantContext, mode: TenancyMode) -> TransactionGuard {
        let session: Arc<dyn DbSession> = Arc::new(db.session(Arc::new(InterceptorPipeline::new())));
        TransactionGuard::new(session, tenant, SessionVariableSetter::new(mode))
    }

    fn guard(db: &MemoryDatabase) -> TransactionGuard {
        guard_on(db, TenantContext::new(Uuid::new_v4()), TenancyMode::SingleLevel)
    }

    #[tokio::test]
    async fn repeated_reads_open_one_transaction() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();

        for _ in 0..5 {
            guard.ensure_read(&cancel).await.unwrap();
        }

        assert_eq!(db.begin_count(), 1);
        assert_eq!(guard.mode().await, TransactionMode::ReadOnly);
        assert_eq!(
            db.executed(),
            vec![
                "select set_config('app.tenant_id', $1, true)".to_string(),
                "SET TRANSACTION READ ONLY".to_string(),
            ]
        );
        guard.finalize(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn promotion_replaces_read_transaction() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();

        guard.ensure_read(&cancel).await.unwrap();
        guard.ensure_write(&cancel).await.unwrap();

        assert_eq!(db.begin_count(), 2);
        assert_eq!(db.rollback_count(), 1);
        assert_eq!(guard.mode().await, TransactionMode::Write);

        let stamps = db
            .executed()
            .iter()
            .filter(|sql| sql.contains("app.tenant_id"))
            .count();
        assert_eq!(stamps, 2);
        // The write transaction is not marked read-only
        assert_eq!(db.executed().last().unwrap(), "select set_config('app.tenant_id', $1, true)");
        guard.finalize(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn second_write_is_a_no_op() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();

        guard.ensure_write(&cancel).await.unwrap();
        guard.ensure_write(&cancel).await.unwrap();
        guard.ensure_read(&cancel).await.unwrap();

        assert_eq!(db.begin_count(), 1);
        assert_eq!(db.rollback_count(), 0);
        assert_eq!(guard.mode().await, TransactionMode::Write);
        guard.finalize(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn empty_tenant_fails_before_any_protocol_call() {
        let db = MemoryDatabase::new();
        let cancel = CancellationToken::new();

        for tenant in [TenantContext::unresolved(), TenantContext::new(Uuid::nil())] {
            let guard = guard_on(&db, tenant, TenancyMode::SingleLevel);
            let read = guard.ensure_read(&cancel).await.unwrap_err();
            let write = guard.ensure_write(&cancel).await.unwrap_err();
            assert!(read.is_configuration());
            assert!(matches!(write, GuardError::MissingTenant));
            guard.finalize(&cancel).await.unwrap();
        }

        assert_eq!(db.begin_count(), 0);
        assert!(db.journal().is_empty());
    }

    #[tokio::test]
    async fn two_level_mode_stamps_group_then_tenant() {
        let db = MemoryDatabase::new();
        let tenant = Uuid::new_v4();
        let group = Uuid::new_v4();
        let guard = guard_on(
            &db,
            TenantContext::new(tenant).with_group(group),
            TenancyMode::TwoLevel,
        );
        let cancel = CancellationToken::new();

        guard.ensure_write(&cancel).await.unwrap();

        let executed = db.executed();
        assert_eq!(executed[0], "select set_config('app.group_id', $1, true)");
        assert_eq!(executed[1], "select set_config('app.tenant_id', $1, true)");
        let params: Vec<Vec<SqlValue>> = db
            .journal()
            .into_iter()
            .filter_map(|entry| match entry {
                crate::database::memory::JournalEntry::Execute { params, .. } => Some(params),
                _ => None,
            })
            .collect();
        assert_eq!(params[0], vec![SqlValue::Text(group.to_string())]);
        assert_eq!(params[1], vec![SqlValue::Text(tenant.to_string())]);
        guard.finalize(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn finalize_commits_and_disposes() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();

        guard.ensure_read(&cancel).await.unwrap();
        guard.finalize(&cancel).await.unwrap();
        // Idempotent
        guard.finalize(&cancel).await.unwrap();

        assert_eq!(db.commit_count(), 1);
        assert!(guard.is_disposed().await);
        assert!(!guard.has_transaction().await);
        assert!(matches!(guard.ensure_read(&cancel).await, Err(GuardError::Disposed)));
        assert!(matches!(guard.ensure_write(&cancel).await, Err(GuardError::Disposed)));
    }

    #[tokio::test]
    async fn failed_commit_surfaces_original_error_and_leaves_nothing_open() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();

        guard.ensure_write(&cancel).await.unwrap();
        db.fail_next(FaultPoint::Commit);

        let err = guard.finalize(&cancel).await.unwrap_err();
        assert!(err.to_string().contains("injected Commit failure"));
        assert_eq!(db.commit_count(), 1);
        assert!(!guard.has_transaction().await);
        assert!(!db.has_open_transaction());

        // A second dispose does not retry the commit
        guard.finalize(&cancel).await.unwrap();
        assert_eq!(db.commit_count(), 1);
    }

    #[tokio::test]
    async fn failed_stamp_rolls_back_new_transaction() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();

        db.fail_next(FaultPoint::Execute);
        assert!(guard.ensure_read(&cancel).await.is_err());
        assert_eq!(guard.mode().await, TransactionMode::None);
        assert!(!db.has_open_transaction());
        assert_eq!(db.rollback_count(), 1);

        // The guard is still usable
        guard.ensure_read(&cancel).await.unwrap();
        assert_eq!(guard.mode().await, TransactionMode::ReadOnly);
        guard.finalize(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_promotion_does_not_straddle() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();
        guard.ensure_read(&cancel).await.unwrap();

        db.set_latency(Some(Duration::from_millis(200)));
        let timeout = CancellationToken::new();
        let trigger = timeout.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = guard.ensure_write(&timeout).await.unwrap_err();
        assert!(matches!(err, GuardError::Cancelled));
        db.set_latency(None);

        // Either the read transaction survived or nothing is open
        match guard.mode().await {
            TransactionMode::ReadOnly => assert!(db.has_open_transaction()),
            TransactionMode::None => assert!(!db.has_open_transaction()),
            TransactionMode::Write => panic!("promotion must not complete after cancellation"),
        }

        guard.ensure_write(&cancel).await.unwrap();
        assert_eq!(guard.mode().await, TransactionMode::Write);
        guard.finalize(&cancel).await.unwrap();
    }

    #[tokio::test]
    async fn sequential_guards_see_only_their_own_tenant() {
        let db = MemoryDatabase::new().with_row_level_security();
        let (acme, beta) = (Uuid::new_v4(), Uuid::new_v4());
        db.seed("projects", acme, None, "acme-apollo");
        db.seed("projects", acme, None, "acme-gemini");
        db.seed("projects", beta, None, "beta-mercury");
        let cancel = CancellationToken::new();
        let select = Statement::new("select * from projects");

        let first = guard_on(&db, TenantContext::new(acme), TenancyMode::SingleLevel);
        first.ensure_read(&cancel).await.unwrap();
        let rows = first.session.fetch_json(&select).await.unwrap();
        let payloads: Vec<_> = rows.iter().map(|r| r["payload"].as_str().unwrap()).collect();
        assert_eq!(payloads, vec!["acme-apollo", "acme-gemini"]);
        first.finalize(&cancel).await.unwrap();

        let second = guard_on(&db, TenantContext::new(beta), TenancyMode::SingleLevel);
        second.ensure_read(&cancel).await.unwrap();
        let rows = second.session.fetch_json(&select).await.unwrap();
        let payloads: Vec<_> = rows.iter().map(|r| r["payload"].as_str().unwrap()).collect();
        assert_eq!(payloads, vec!["beta-mercury"]);
        second.finalize(&cancel).await.unwrap();

        assert_eq!(db.commit_count(), 2);
    }

    #[tokio::test]
    async fn abort_rolls_back() {
        let db = MemoryDatabase::new();
        let guard = guard(&db);
        let cancel = CancellationToken::new();

        guard.ensure_write(&cancel).await.unwrap();
        guard.abort().await.unwrap();

        assert_eq!(db.commit_count(), 0);
        assert_eq!(db.rollback_count(), 1);
        assert!(guard.is_disposed().await);
    }
}
