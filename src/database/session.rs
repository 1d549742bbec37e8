use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::provider::DatabaseProvider;
use crate::interceptor::InterceptorPipeline;

/// Opaque handle for the transaction attached to a session.
/// Ids are unique for the lifetime of the process, so a stale handle never matches a newer transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransactionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// A bound statement parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Text(String),
    Uuid(Uuid),
    Int(i64),
    Bool(bool),
    Null,
}

impl SqlValue {
    /// Text form of the value, as Postgres would cast it to `text`
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Uuid(u) => Some(u.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Null => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Uuid> for SqlValue {
    fn from(v: Uuid) -> Self {
        SqlValue::Uuid(v)
    }
}

impl From<Option<Uuid>> for SqlValue {
    fn from(v: Option<Uuid>) -> Self {
        v.map(SqlValue::Uuid).unwrap_or(SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

/// SQL text with positional parameters ($1, $2, ...). Values are always bound, never interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: Cow<'static, str>,
    params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// One request's logical database connection.
///
/// At most one transaction is attached at a time. Statements run inside the attached
/// transaction when there is one, standalone otherwise.
#[async_trait]
pub trait DbSession: Send + Sync {
    fn provider(&self) -> DatabaseProvider;

    /// Whether the underlying connection can still run statements
    fn is_open(&self) -> bool;

    /// Hooks fired by this session and by units of work flushing through it
    fn interceptors(&self) -> &InterceptorPipeline;

    /// Open a transaction and attach it to the session
    async fn begin(&self) -> Result<TransactionId, DatabaseError>;

    /// Commit the attached transaction. The transaction is closed afterwards even when the commit fails.
    async fn commit(&self, tx: TransactionId) -> Result<(), DatabaseError>;

    /// Roll back the attached transaction. Rolling back a transaction that is already closed is a no-op.
    async fn rollback(&self, tx: TransactionId) -> Result<(), DatabaseError>;

    async fn current_transaction(&self) -> Option<TransactionId>;

    /// Run a statement, returning the number of affected rows
    async fn execute(&self, statement: &Statement) -> Result<u64, DatabaseError>;

    /// Run a query, returning each row as a JSON object
    async fn fetch_json(&self, statement: &Statement) -> Result<Vec<Value>, DatabaseError>;
}
