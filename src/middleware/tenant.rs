use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::auth::AuthUser;
use crate::tenancy::TenantContext;

/// Decides which tenant a request belongs to
#[async_trait]
pub trait TenantResolver: Send + Sync {
    async fn resolve(&self, user: &AuthUser, host: Option<&str>) -> Result<TenantContext, ApiError>;
}

/// Takes the tenant (and group) straight from the token. The host is recorded for audit only.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaimsTenantResolver;

#[async_trait]
impl TenantResolver for ClaimsTenantResolver {
    async fn resolve(&self, user: &AuthUser, host: Option<&str>) -> Result<TenantContext, ApiError> {
        let claims = &user.0;
        let mut context = TenantContext::new(claims.tenant_id).with_user_tenant(claims.tenant_id);
        if let Some(group_id) = claims.group_id {
            context = context.with_group(group_id);
        }
        if let Some(host) = host {
            context = context.with_host(host);
        }
        Ok(context)
    }
}

/// Resolves the request's TenantContext and stores it in the request extensions
pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before tenant resolution"))?;

    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let context = state.resolver.resolve(&user, host.as_deref()).await?;
    tracing::debug!(
        "Resolved tenant {:?} (group {:?}, subdomain {:?})",
        context.tenant_id(),
        context.group_id(),
        context.subdomain()
    );

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
