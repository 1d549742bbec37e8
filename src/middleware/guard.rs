use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::app::AppState;
use crate::database::session::DbSession;
use crate::error::ApiError;
use crate::tenancy::{ambient, RequestScope, TenantContext};

/// The request's database session
#[derive(Clone)]
pub struct RequestSession(pub Arc<dyn DbSession>);

/// Cancelled when the request is dropped before it completes
#[derive(Clone, Default)]
pub struct RequestCancellation(pub CancellationToken);

/// Builds the request's session and guard, installs the guard in the ambient slot for the
/// rest of the stack, then finalizes it. Server errors roll the transaction back instead.
pub async fn ambient_guard_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let tenant = request.extensions().get::<TenantContext>().cloned();

    let interceptors = state.factory.interceptors_for(tenant.as_ref())?;
    let session = state.backend.open(Arc::new(interceptors));
    let guard = state
        .factory
        .create_guard(&RequestScope::new(session.clone(), tenant))?;

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    request.extensions_mut().insert(RequestSession(session));
    request.extensions_mut().insert(RequestCancellation(cancel.clone()));

    tracing::debug!("Installed {:?} guard for {}", guard.kind(), request.uri().path());
    let response = ambient::scope(guard.clone(), next.run(request)).await;

    if response.status().is_server_error() {
        if let Err(e) = guard.abort().await {
            tracing::warn!("Rollback after failed request also failed: {}", e);
        }
        return Ok(response);
    }

    guard.finalize(&cancel).await?;
    Ok(response)
}
