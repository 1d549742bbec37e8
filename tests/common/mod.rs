#![allow(dead_code)]

use anyhow::Result;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use corp_tenancy::app::{router, tenant_scoped, AppState};
use corp_tenancy::auth::{encode_jwt, Claims};
use corp_tenancy::database::{
    DatabaseCapability, DatabaseProvider, MemoryDatabase, SessionBackend, Statement,
};
use corp_tenancy::error::ApiError;
use corp_tenancy::handlers::session_info;
use corp_tenancy::middleware::{
    tenant_by_method, tenant_read, tenant_write, RequestCancellation, RequestSession,
};
use corp_tenancy::persistence::DataContext;
use corp_tenancy::tenancy::{GuardFactory, TenancyMode, TenantContext, TenantFeatureFlags};

pub const SECRET: &str = "integration-test-secret";

/// In-process application over an in-memory database that behaves like Postgres
pub struct TestApp {
    pub db: MemoryDatabase,
    router: Router,
}

impl TestApp {
    /// All tenant features on, Postgres capability, memory storage
    pub fn new(db: MemoryDatabase) -> Self {
        Self::with_factory(
            db,
            GuardFactory::new(
                TenantFeatureFlags::all_enabled(),
                DatabaseCapability::for_provider(DatabaseProvider::Postgres),
                TenancyMode::SingleLevel,
            ),
        )
    }

    pub fn with_factory(db: MemoryDatabase, factory: GuardFactory) -> Self {
        let state = AppState::new(factory, SessionBackend::Memory(db.clone()), SECRET);
        let router = router(state.clone()).merge(tenant_scoped(&state, notes_routes()).with_state(state));
        Self { db, router }
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<(StatusCode, Value)> {
        self.send(Request::builder().method("GET").uri(path), token, Body::empty())
            .await
    }

    pub async fn post(&self, path: &str, token: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json"),
            token,
            Body::from(serde_json::to_vec(&body)?),
        )
        .await
    }

    async fn send(
        &self,
        builder: axum::http::request::Builder,
        token: Option<&str>,
        body: Body,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = builder.header("host", "acme.corp.example.com");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }

        let res = self.router.clone().oneshot(builder.body(body)?).await?;
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, json))
    }
}

pub fn token_for(tenant: Uuid) -> String {
    encode_jwt(&Claims::with_expiry("tester", tenant, None, 1), SECRET).expect("token")
}

pub fn group_token_for(tenant: Uuid, group: Uuid) -> String {
    encode_jwt(&Claims::with_expiry("tester", tenant, Some(group), 1), SECRET).expect("token")
}

fn notes_routes() -> Router<AppState> {
    Router::new()
        .route("/api/notes", get(list_notes).layer(middleware::from_fn(tenant_read)))
        .route("/api/notes", post(create_note))
        .route("/api/notes/fail", post(create_then_fail))
        .route("/api/notes/marked", post(create_note).layer(middleware::from_fn(tenant_write)))
        .route(
            "/api/session/by-method",
            get(session_info).post(session_info).layer(middleware::from_fn(tenant_by_method)),
        )
}

fn insert_note(tenant_id: Uuid, group_id: Option<Uuid>, payload: &str) -> Statement {
    Statement::new("insert into notes (tenant_id, group_id, payload) values ($1, $2, $3)")
        .bind(tenant_id)
        .bind(group_id)
        .bind(payload)
}

async fn list_notes(
    Extension(RequestSession(session)): Extension<RequestSession>,
    Extension(RequestCancellation(cancel)): Extension<RequestCancellation>,
) -> Result<Json<Value>, ApiError> {
    let context = DataContext::new(session);
    let rows = context.query(&Statement::new("select * from notes"), &cancel).await?;
    Ok(Json(json!({ "success": true, "data": rows })))
}

/// Writes go through save_changes only, so the guard is promoted by the interceptor
async fn create_note(
    Extension(tenant): Extension<TenantContext>,
    Extension(RequestSession(session)): Extension<RequestSession>,
    Extension(RequestCancellation(cancel)): Extension<RequestCancellation>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let owner = match body["tenant_id"].as_str() {
        Some(id) => Uuid::parse_str(id).map_err(|_| ApiError::bad_request("invalid tenant_id"))?,
        None => tenant.require_tenant_id()?,
    };
    let payload = body["payload"].as_str().unwrap_or_default();

    let mut context = DataContext::new(session);
    context.add(insert_note(owner, tenant.group_id(), payload));
    let saved = context.save_changes(&cancel).await?;

    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": { "saved": saved } }))))
}

async fn create_then_fail(
    Extension(tenant): Extension<TenantContext>,
    Extension(RequestSession(session)): Extension<RequestSession>,
    Extension(RequestCancellation(cancel)): Extension<RequestCancellation>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let mut context = DataContext::new(session);
    context.add(insert_note(
        tenant.require_tenant_id()?,
        tenant.group_id(),
        body["payload"].as_str().unwrap_or_default(),
    ));
    context.save_changes(&cancel).await?;

    Err(ApiError::internal_server_error("downstream failure after write"))
}
