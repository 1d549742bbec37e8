//! Runs against a real server when CORP_TEST_DATABASE_URL is set; skipped otherwise.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use corp_tenancy::database::{
    DatabaseCapability, DatabaseManager, DatabaseProvider, DbSession, PgSession, Statement,
};
use corp_tenancy::tenancy::{
    GuardFactory, RequestGuard, RequestScope, TenancyMode, TenantContext, TenantFeatureFlags,
};

async fn pool() -> Result<Option<sqlx::PgPool>> {
    match std::env::var("CORP_TEST_DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => Ok(Some(DatabaseManager::pool_for(&url).await?)),
        _ => {
            eprintln!("CORP_TEST_DATABASE_URL not set; skipping");
            Ok(None)
        }
    }
}

fn factory() -> GuardFactory {
    GuardFactory::new(
        TenantFeatureFlags::all_enabled(),
        DatabaseCapability::for_provider(DatabaseProvider::Postgres),
        TenancyMode::SingleLevel,
    )
}

async fn tenant_setting(session: &dyn DbSession) -> Result<Option<String>> {
    let rows = session
        .fetch_json(&Statement::new("select current_setting('app.tenant_id', true) as value"))
        .await?;
    Ok(rows
        .first()
        .and_then(|row| row["value"].as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string))
}

#[tokio::test]
async fn guard_stamps_the_transaction_and_clears_on_commit() -> Result<()> {
    let Some(pool) = pool().await? else { return Ok(()) };
    let tenant = TenantContext::new(Uuid::new_v4());
    let cancel = CancellationToken::new();

    let factory = factory();
    let interceptors = Arc::new(factory.interceptors_for(Some(&tenant))?);
    let session: Arc<dyn DbSession> = Arc::new(PgSession::new(pool, interceptors));
    let guard = factory.create_guard(&RequestScope::new(session.clone(), Some(tenant.clone())))?;

    guard.ensure_read(&cancel).await?;
    assert_eq!(
        tenant_setting(session.as_ref()).await?,
        tenant.tenant_id().map(|id| id.to_string())
    );

    guard.ensure_write(&cancel).await?;
    assert_eq!(
        tenant_setting(session.as_ref()).await?,
        tenant.tenant_id().map(|id| id.to_string())
    );

    guard.finalize(&cancel).await?;
    assert!(session.current_transaction().await.is_none());
    assert_eq!(tenant_setting(session.as_ref()).await?, None);
    Ok(())
}

#[tokio::test]
async fn externally_opened_transactions_are_stamped() -> Result<()> {
    let Some(pool) = pool().await? else { return Ok(()) };
    let tenant = TenantContext::new(Uuid::new_v4());
    let cancel = CancellationToken::new();

    let interceptors = Arc::new(factory().interceptors_for(Some(&tenant))?);
    let session = PgSession::new(pool.clone(), interceptors);

    let tx = session.use_transaction(pool.begin().await?, &cancel).await?;
    assert_eq!(tenant_setting(&session).await?, tenant.tenant_id().map(|id| id.to_string()));

    session.rollback(tx).await?;
    Ok(())
}
