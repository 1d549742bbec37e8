use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::config;
use crate::database::session::TransactionId;

/// Errors raised by the database layer and the persistence sessions
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Unknown database provider: {0}")]
    UnknownProvider(String),

    #[error("Session connection is closed")]
    ConnectionClosed,

    #[error("A transaction is already attached to this session")]
    TransactionAlreadyOpen,

    #[error("Transaction {0} is not the transaction attached to this session")]
    TransactionMismatch(TransactionId),

    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unsupported statement: {0}")]
    Unsupported(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Centralized connection pool manager, one pool per database URL
pub struct DatabaseManager {
    pools: Arc<RwLock<HashMap<String, PgPool>>>,
}

impl DatabaseManager {
    fn instance() -> &'static DatabaseManager {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<DatabaseManager> = OnceLock::new();
        INSTANCE.get_or_init(|| DatabaseManager {
            pools: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Get the application pool for DATABASE_URL
    pub async fn main_pool() -> Result<PgPool, DatabaseError> {
        let url = config::config()
            .database
            .url
            .as_deref()
            .ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;
        Self::instance().get_pool(url).await
    }

    /// Get the pool for an explicit connection string
    pub async fn pool_for(database_url: &str) -> Result<PgPool, DatabaseError> {
        Self::instance().get_pool(database_url).await
    }

    /// Get existing pool or create a new one lazily
    async fn get_pool(&self, database_url: &str) -> Result<PgPool, DatabaseError> {
        // Fast path: try read lock
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(database_url) {
                return Ok(pool.clone());
            }
        }

        let label = Self::redacted(database_url)?;
        let settings = &config::config().database;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect(database_url)
            .await?;

        {
            let mut pools = self.pools.write().await;
            pools.insert(database_url.to_string(), pool.clone());
        }

        info!("Created database pool for: {}", label);
        Ok(pool)
    }

    /// Connection string with the password removed, safe for logs
    fn redacted(database_url: &str) -> Result<String, DatabaseError> {
        let mut url = url::Url::parse(database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        if url.password().is_some() {
            url.set_password(Some("***"))
                .map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        }
        Ok(url.into_string())
    }

    /// Close and remove all pools (e.g., on shutdown)
    pub async fn close_all() {
        let manager = Self::instance();
        let mut pools = manager.pools.write().await;
        for (url, pool) in pools.drain() {
            pool.close().await;
            info!("Closed database pool: {}", Self::redacted(&url).unwrap_or_default());
        }
    }
}
