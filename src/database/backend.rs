use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::memory::MemoryDatabase;
use crate::database::postgres::PgSession;
use crate::database::provider::DatabaseProvider;
use crate::database::session::DbSession;
use crate::interceptor::InterceptorPipeline;

/// Where request sessions come from
#[derive(Clone)]
pub enum SessionBackend {
    Postgres(PgPool),
    Memory(MemoryDatabase),
}

impl SessionBackend {
    pub async fn from_config(config: &AppConfig) -> Result<Self, DatabaseError> {
        match config.database.provider.parse::<DatabaseProvider>()? {
            DatabaseProvider::Postgres => Ok(SessionBackend::Postgres(DatabaseManager::main_pool().await?)),
            DatabaseProvider::Memory => Ok(SessionBackend::Memory(MemoryDatabase::new())),
            DatabaseProvider::Sqlite => Err(DatabaseError::Unsupported(
                "no session backend is available for Sqlite".to_string(),
            )),
        }
    }

    pub fn provider(&self) -> DatabaseProvider {
        match self {
            SessionBackend::Postgres(_) => DatabaseProvider::Postgres,
            SessionBackend::Memory(_) => DatabaseProvider::Memory,
        }
    }

    /// A fresh session for one request
    pub fn open(&self, interceptors: Arc<InterceptorPipeline>) -> Arc<dyn DbSession> {
        match self {
            SessionBackend::Postgres(pool) => Arc::new(PgSession::new(pool.clone(), interceptors)),
            SessionBackend::Memory(db) => Arc::new(db.session(interceptors)),
        }
    }

    pub async fn ping(&self) -> Result<(), DatabaseError> {
        match self {
            SessionBackend::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await?;
                Ok(())
            }
            SessionBackend::Memory(_) => Ok(()),
        }
    }
}
