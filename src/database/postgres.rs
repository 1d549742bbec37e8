use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;
use sqlx::{PgPool, Row, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::database::manager::DatabaseError;
use crate::database::provider::DatabaseProvider;
use crate::database::session::{DbSession, SqlValue, Statement, TransactionId};
use crate::interceptor::InterceptorPipeline;
use crate::tenancy::GuardError;

struct AttachedTransaction {
    id: TransactionId,
    tx: Transaction<'static, Postgres>,
}

/// Postgres-backed session over a shared pool.
///
/// The attached transaction pins one pooled connection until it is committed or rolled
/// back. Dropping the session with a transaction still attached rolls it back.
pub struct PgSession {
    pool: PgPool,
    attached: Mutex<Option<AttachedTransaction>>,
    interceptors: Arc<InterceptorPipeline>,
}

impl PgSession {
    pub fn new(pool: PgPool, interceptors: Arc<InterceptorPipeline>) -> Self {
        Self {
            pool,
            attached: Mutex::new(None),
            interceptors,
        }
    }

    /// Attach a transaction opened elsewhere (outside any guard) and fire the
    /// transaction-used hooks so it still receives the tenant session variables.
    pub async fn use_transaction(
        &self,
        tx: Transaction<'static, Postgres>,
        cancel: &CancellationToken,
    ) -> Result<TransactionId, GuardError> {
        let id = {
            let mut attached = self.attached.lock().await;
            if attached.is_some() {
                return Err(DatabaseError::TransactionAlreadyOpen.into());
            }
            let id = TransactionId::next();
            *attached = Some(AttachedTransaction { id, tx });
            id
        };

        tracing::debug!("Attached external transaction {}", id);
        self.interceptors.transaction_used(self, id, cancel).await?;
        Ok(id)
    }

    async fn take_matching(&self, id: TransactionId) -> Result<Option<AttachedTransaction>, DatabaseError> {
        let mut attached = self.attached.lock().await;
        match attached.as_ref() {
            Some(current) if current.id == id => Ok(attached.take()),
            Some(_) => Err(DatabaseError::TransactionMismatch(id)),
            None => Ok(None),
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Text(s) => query.bind(s.as_str()),
        SqlValue::Uuid(u) => query.bind(*u),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Null => query.bind(None::<String>),
    }
}

fn build<'q>(sql: &'q str, params: &'q [SqlValue]) -> Query<'q, Postgres, PgArguments> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

#[async_trait]
impl DbSession for PgSession {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::Postgres
    }

    fn is_open(&self) -> bool {
        !self.pool.is_closed()
    }

    fn interceptors(&self) -> &InterceptorPipeline {
        &self.interceptors
    }

    async fn begin(&self) -> Result<TransactionId, DatabaseError> {
        let mut attached = self.attached.lock().await;
        if attached.is_some() {
            return Err(DatabaseError::TransactionAlreadyOpen);
        }
        let tx = self.pool.begin().await?;
        let id = TransactionId::next();
        *attached = Some(AttachedTransaction { id, tx });
        Ok(id)
    }

    async fn commit(&self, id: TransactionId) -> Result<(), DatabaseError> {
        match self.take_matching(id).await? {
            Some(current) => Ok(current.tx.commit().await?),
            None => Err(DatabaseError::TransactionMismatch(id)),
        }
    }

    async fn rollback(&self, id: TransactionId) -> Result<(), DatabaseError> {
        match self.take_matching(id).await? {
            Some(current) => Ok(current.tx.rollback().await?),
            None => Ok(()),
        }
    }

    async fn current_transaction(&self) -> Option<TransactionId> {
        self.attached.lock().await.as_ref().map(|current| current.id)
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, DatabaseError> {
        let query = build(statement.sql(), statement.params());
        let mut attached = self.attached.lock().await;
        let result = match attached.as_mut() {
            Some(current) => query.execute(&mut *current.tx).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn fetch_json(&self, statement: &Statement) -> Result<Vec<Value>, DatabaseError> {
        // Aggregate server-side so arbitrary column types arrive as JSON
        let wrapped = format!(
            "select coalesce(json_agg(q), '[]'::json) as rows from ({}) q",
            statement.sql()
        );
        let query = build(&wrapped, statement.params());
        let mut attached = self.attached.lock().await;
        let row = match attached.as_mut() {
            Some(current) => query.fetch_one(&mut *current.tx).await?,
            None => query.fetch_one(&self.pool).await?,
        };

        match row.try_get::<Value, _>("rows")? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}
