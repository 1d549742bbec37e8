use anyhow::Context;
use tracing_subscriber::EnvFilter;

use corp_tenancy::app::{router, AppState};
use corp_tenancy::config;
use corp_tenancy::database::DatabaseManager;
use corp_tenancy::is_production;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, TENANT_* flags, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    tracing::info!("Starting Corp API in {:?} mode", config.environment);

    if is_production!() && config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set in production");
    }

    let state = AppState::from_config(config)
        .await
        .context("initializing application state")?;
    tracing::info!(
        provider = %state.backend.provider(),
        tenant_context = state.factory.uses_tenant_context(),
        write_promotion = state.factory.promotes_on_save(),
        "Tenant guard policy resolved"
    );

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Corp API listening on http://{}", bind_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server")?;

    DatabaseManager::close_all().await;
    Ok(())
}
