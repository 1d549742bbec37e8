//! Embedded in-memory engine.
//!
//! Stands in for a real server in tests and small deployments. It models a pool with a
//! single physical connection: session-level settings persist on that connection across
//! transactions, `set_config(.., true)` settings vanish when the transaction ends, and
//! read-only transactions reject writes. With row-level security switched on, reads and
//! inserts are filtered against `app.tenant_id` / `app.group_id` the way the Postgres
//! policies do it.
//!
//! Only the statements this crate issues are understood:
//! `select set_config('<key>', $1, <local>)`, `SET TRANSACTION READ ONLY`,
//! `insert into <table> (tenant_id, group_id, payload) values ($1, $2, $3)`,
//! `select * from <table>` and `select current_setting('<key>', true)`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::provider::DatabaseProvider;
use crate::database::session::{DbSession, SqlValue, Statement, TransactionId};
use crate::interceptor::InterceptorPipeline;
use crate::tenancy::variables::{GROUP_VARIABLE, TENANT_VARIABLE};

/// Operations that can be made to fail once, for error-path tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    Commit,
    Rollback,
    Execute,
}

/// Everything the engine was asked to do, in order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JournalEntry {
    Begin(TransactionId),
    Commit(TransactionId),
    Rollback(TransactionId),
    Execute {
        tx: Option<TransactionId>,
        sql: String,
        params: Vec<SqlValue>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryRow {
    pub tenant_id: Uuid,
    pub group_id: Option<Uuid>,
    pub payload: String,
}

impl MemoryRow {
    fn to_json(&self) -> Value {
        json!({
            "tenant_id": self.tenant_id,
            "group_id": self.group_id,
            "payload": self.payload,
        })
    }
}

struct ActiveTransaction {
    id: TransactionId,
    session: u64,
    read_only: bool,
    local_settings: HashMap<String, String>,
    pending: Vec<(String, MemoryRow)>,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Vec<MemoryRow>>,
    session_settings: HashMap<String, String>,
    active: Option<ActiveTransaction>,
    journal: Vec<JournalEntry>,
    faults: Vec<FaultPoint>,
}

impl MemoryState {
    fn trip(&mut self, point: FaultPoint) -> Result<(), DatabaseError> {
        match self.faults.iter().position(|p| *p == point) {
            Some(index) => {
                self.faults.remove(index);
                Err(DatabaseError::QueryError(format!("injected {:?} failure", point)))
            }
            None => Ok(()),
        }
    }

    fn active_for(&mut self, session: u64) -> Option<&mut ActiveTransaction> {
        self.active.as_mut().filter(|tx| tx.session == session)
    }

    fn setting(&self, session: u64, key: &str) -> Option<String> {
        self.active
            .as_ref()
            .filter(|tx| tx.session == session)
            .and_then(|tx| tx.local_settings.get(key))
            .or_else(|| self.session_settings.get(key))
            .cloned()
    }
}

/// Shared handle to one in-memory database
#[derive(Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    row_level_security: Arc<AtomicBool>,
    latency: Arc<Mutex<Option<Duration>>>,
    next_session: Arc<AtomicU64>,
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            row_level_security: Arc::new(AtomicBool::new(false)),
            latency: Arc::new(Mutex::new(None)),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Enforce tenant filtering on reads and inserts
    pub fn with_row_level_security(self) -> Self {
        self.row_level_security.store(true, Ordering::SeqCst);
        self
    }

    /// Delay every engine call, giving cancellation something to interrupt
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Make the next call of the given kind fail
    pub fn fail_next(&self, point: FaultPoint) {
        self.lock().faults.push(point);
    }

    /// Insert a committed row directly, bypassing sessions and policies
    pub fn seed(&self, table: &str, tenant_id: Uuid, group_id: Option<Uuid>, payload: &str) {
        self.lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(MemoryRow {
                tenant_id,
                group_id,
                payload: payload.to_string(),
            });
    }

    /// Open a new session on this database
    pub fn session(&self, interceptors: Arc<InterceptorPipeline>) -> MemorySession {
        MemorySession {
            db: self.clone(),
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            interceptors,
            open: AtomicBool::new(true),
        }
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.lock().journal.clone()
    }

    pub fn begin_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Begin(_)))
    }

    pub fn commit_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Commit(_)))
    }

    pub fn rollback_count(&self) -> usize {
        self.count(|e| matches!(e, JournalEntry::Rollback(_)))
    }

    /// SQL text of every executed statement, in order
    pub fn executed(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|e| match e {
                JournalEntry::Execute { sql, .. } => Some(sql.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether any transaction is open on the physical connection
    pub fn has_open_transaction(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Committed rows of a table, ignoring policies
    pub fn committed_rows(&self, table: &str) -> Vec<MemoryRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    fn count(&self, predicate: impl Fn(&JournalEntry) -> bool) -> usize {
        self.lock().journal.iter().filter(|e| predicate(e)).count()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn pause(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn run(&self, session: u64, statement: &Statement) -> Result<(u64, Vec<Value>), DatabaseError> {
        let rls = self.row_level_security.load(Ordering::SeqCst);
        let mut state = self.lock();
        state.trip(FaultPoint::Execute)?;

        let tx = state.active_for(session).map(|tx| tx.id);
        state.journal.push(JournalEntry::Execute {
            tx,
            sql: statement.sql().to_string(),
            params: statement.params().to_vec(),
        });

        let sql = statement.sql().trim();
        let lowered = sql.to_ascii_lowercase();

        if lowered == "set transaction read only" {
            let active = state
                .active_for(session)
                .ok_or_else(|| DatabaseError::QueryError("SET TRANSACTION can only be used in transaction blocks".into()))?;
            active.read_only = true;
            return Ok((0, Vec::new()));
        }

        if let Some(rest) = lowered.strip_prefix("select set_config('") {
            let key = rest
                .split('\'')
                .next()
                .ok_or_else(|| DatabaseError::Unsupported(sql.to_string()))?
                .to_string();
            let value = statement
                .params()
                .first()
                .and_then(SqlValue::as_text)
                .ok_or_else(|| DatabaseError::QueryError("set_config value must be bound".into()))?;
            let local = rest.trim_end_matches(';').trim_end().ends_with("true)");
            if local {
                // Outside a transaction block Postgres discards a local setting immediately
                if let Some(active) = state.active_for(session) {
                    active.local_settings.insert(key, value.clone());
                }
            } else {
                state.session_settings.insert(key, value.clone());
            }
            return Ok((1, vec![json!({ "set_config": value })]));
        }

        if let Some(rest) = lowered.strip_prefix("select current_setting('") {
            let key = rest.split('\'').next().unwrap_or_default();
            let value = state.setting(session, key);
            return Ok((1, vec![json!({ "current_setting": value })]));
        }

        if let Some(table) = lowered.strip_prefix("select * from ") {
            let table = table.trim_end_matches(';').trim().to_string();
            let tenant = state.setting(session, TENANT_VARIABLE);
            let group = state.setting(session, GROUP_VARIABLE);
            let visible = |row: &MemoryRow| {
                !rls || (tenant.as_deref() == Some(row.tenant_id.to_string().as_str())
                    && group
                        .as_ref()
                        .map_or(true, |g| row.group_id.map(|id| id.to_string()).as_ref() == Some(g)))
            };

            let mut rows: Vec<Value> = state
                .tables
                .get(&table)
                .into_iter()
                .flatten()
                .filter(|row| visible(row))
                .map(MemoryRow::to_json)
                .collect();
            if let Some(active) = state.active.as_ref().filter(|tx| tx.session == session) {
                rows.extend(
                    active
                        .pending
                        .iter()
                        .filter(|(t, row)| *t == table && visible(row))
                        .map(|(_, row)| row.to_json()),
                );
            }
            return Ok((rows.len() as u64, rows));
        }

        if let Some(rest) = lowered.strip_prefix("insert into ") {
            let table = rest
                .split_whitespace()
                .next()
                .ok_or_else(|| DatabaseError::Unsupported(sql.to_string()))?
                .to_string();
            let row = Self::row_from_params(statement.params())?;

            if rls {
                let tenant = state.setting(session, TENANT_VARIABLE);
                if tenant.as_deref() != Some(row.tenant_id.to_string().as_str()) {
                    return Err(DatabaseError::QueryError(format!(
                        "new row violates row-level security policy for table \"{}\"",
                        table
                    )));
                }
            }

            match state.active_for(session) {
                Some(active) if active.read_only => Err(DatabaseError::QueryError(
                    "cannot execute INSERT in a read-only transaction".into(),
                )),
                Some(active) => {
                    active.pending.push((table, row));
                    Ok((1, Vec::new()))
                }
                None => {
                    state.tables.entry(table).or_default().push(row);
                    Ok((1, Vec::new()))
                }
            }
        } else {
            Err(DatabaseError::Unsupported(sql.to_string()))
        }
    }

    fn row_from_params(params: &[SqlValue]) -> Result<MemoryRow, DatabaseError> {
        let parse = |value: Option<&SqlValue>| -> Result<Option<Uuid>, DatabaseError> {
            match value {
                Some(SqlValue::Uuid(u)) => Ok(Some(*u)),
                Some(SqlValue::Text(s)) => Uuid::parse_str(s)
                    .map(Some)
                    .map_err(|_| DatabaseError::QueryError(format!("invalid uuid: {}", s))),
                Some(SqlValue::Null) | None => Ok(None),
                Some(other) => Err(DatabaseError::QueryError(format!("invalid uuid: {:?}", other))),
            }
        };

        let tenant_id = parse(params.first())?
            .ok_or_else(|| DatabaseError::QueryError("tenant_id is required".into()))?;
        let group_id = parse(params.get(1))?;
        let payload = params
            .get(2)
            .and_then(SqlValue::as_text)
            .unwrap_or_default();

        Ok(MemoryRow {
            tenant_id,
            group_id,
            payload,
        })
    }
}

/// One session over a [`MemoryDatabase`]
pub struct MemorySession {
    db: MemoryDatabase,
    id: u64,
    interceptors: Arc<InterceptorPipeline>,
    open: AtomicBool,
}

impl MemorySession {
    /// Close the connection; later statements fail and transaction-used hooks are skipped
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    /// Open a transaction as some other component would, then attach it and fire the
    /// transaction-used hooks.
    pub async fn use_external_transaction(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<TransactionId, crate::tenancy::GuardError> {
        let id = self.begin().await?;
        tracing::debug!("Attached external transaction {}", id);
        self.interceptors.transaction_used(self, id, cancel).await?;
        Ok(id)
    }

    fn ensure_open(&self) -> Result<(), DatabaseError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DatabaseError::ConnectionClosed)
        }
    }

    fn close_transaction(&self, id: TransactionId, commit: bool) -> Result<bool, DatabaseError> {
        let mut state = self.db.lock();
        let matches = match state.active.as_ref() {
            Some(active) if active.session == self.id && active.id == id => true,
            Some(active) if active.session == self.id => {
                return Err(DatabaseError::TransactionMismatch(id));
            }
            _ => false,
        };
        if !matches {
            return Ok(false);
        }

        state.journal.push(if commit {
            JournalEntry::Commit(id)
        } else {
            JournalEntry::Rollback(id)
        });

        let fault = state.trip(if commit { FaultPoint::Commit } else { FaultPoint::Rollback });
        // The transaction ends either way, as on a real server after a failed COMMIT
        let active = state.active.take();
        fault?;

        if let (true, Some(active)) = (commit, active) {
            for (table, row) in active.pending {
                state.tables.entry(table).or_default().push(row);
            }
        }
        Ok(true)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = self.db.lock();
        if let Some(active) = state.active.as_ref().filter(|tx| tx.session == self.id) {
            let id = active.id;
            state.journal.push(JournalEntry::Rollback(id));
            state.active = None;
        }
    }
}

#[async_trait]
impl DbSession for MemorySession {
    fn provider(&self) -> DatabaseProvider {
        DatabaseProvider::Memory
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn interceptors(&self) -> &InterceptorPipeline {
        &self.interceptors
    }

    async fn begin(&self) -> Result<TransactionId, DatabaseError> {
        self.ensure_open()?;
        self.db.pause().await;
        let mut state = self.db.lock();
        state.trip(FaultPoint::Begin)?;
        match state.active.as_ref() {
            Some(active) if active.session == self.id => return Err(DatabaseError::TransactionAlreadyOpen),
            Some(_) => return Err(DatabaseError::QueryError("connection is busy".into())),
            None => {}
        }

        let id = TransactionId::next();
        state.active = Some(ActiveTransaction {
            id,
            session: self.id,
            read_only: false,
            local_settings: HashMap::new(),
            pending: Vec::new(),
        });
        state.journal.push(JournalEntry::Begin(id));
        Ok(id)
    }

    async fn commit(&self, tx: TransactionId) -> Result<(), DatabaseError> {
        self.db.pause().await;
        if self.close_transaction(tx, true)? {
            Ok(())
        } else {
            Err(DatabaseError::TransactionMismatch(tx))
        }
    }

    async fn rollback(&self, tx: TransactionId) -> Result<(), DatabaseError> {
        self.db.pause().await;
        self.close_transaction(tx, false).map(|_| ())
    }

    async fn current_transaction(&self) -> Option<TransactionId> {
        self.db.lock().active_for(self.id).map(|tx| tx.id)
    }

    async fn execute(&self, statement: &Statement) -> Result<u64, DatabaseError> {
        self.ensure_open()?;
        self.db.pause().await;
        self.db.run(self.id, statement).map(|(affected, _)| affected)
    }

    async fn fetch_json(&self, statement: &Statement) -> Result<Vec<Value>, DatabaseError> {
        self.ensure_open()?;
        self.db.pause().await;
        self.db.run(self.id, statement).map(|(_, rows)| rows)
    }
}
