use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::database::backend::SessionBackend;
use crate::database::manager::DatabaseError;
use crate::handlers;
use crate::middleware::{
    ambient_guard_middleware, jwt_auth_middleware, tenant_context_middleware, tenant_read,
    ClaimsTenantResolver, TenantResolver,
};
use crate::tenancy::GuardFactory;

/// Shared, read-only application state
#[derive(Clone)]
pub struct AppState {
    pub factory: GuardFactory,
    pub backend: SessionBackend,
    pub resolver: Arc<dyn TenantResolver>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(factory: GuardFactory, backend: SessionBackend, jwt_secret: &str) -> Self {
        Self {
            factory,
            backend,
            resolver: Arc::new(ClaimsTenantResolver),
            jwt_secret: Arc::from(jwt_secret),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, DatabaseError> {
        let factory = GuardFactory::from_config(config)?;
        let backend = SessionBackend::from_config(config).await?;
        Ok(Self::new(factory, backend, &config.security.jwt_secret))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn TenantResolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new().route(
        "/api/session",
        get(handlers::session_info).layer(middleware::from_fn(tenant_read)),
    );

    Router::new()
        // Public
        .route("/health", get(handlers::health))
        // Tenant scoped
        .merge(tenant_scoped(&state, api))
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wrap routes in the tenant request pipeline: authentication, tenant resolution, then
/// the ambient guard. Layers run outermost first, so they are added in reverse.
pub fn tenant_scoped(state: &AppState, routes: Router<AppState>) -> Router<AppState> {
    routes
        .route_layer(middleware::from_fn_with_state(state.clone(), ambient_guard_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), tenant_context_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), jwt_auth_middleware))
}
