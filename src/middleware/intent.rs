use axum::{extract::Request, middleware::Next, response::Response};

use crate::error::ApiError;
use crate::middleware::guard::RequestCancellation;
use crate::tenancy::{ambient, AccessIntent};

/// Route layer: the handler runs inside a read transaction
pub async fn tenant_read(request: Request, next: Next) -> Result<Response, ApiError> {
    prepare(AccessIntent::Read, request, next).await
}

/// Route layer: the handler runs inside a write transaction
pub async fn tenant_write(request: Request, next: Next) -> Result<Response, ApiError> {
    prepare(AccessIntent::Write, request, next).await
}

/// Route layer: read for safe methods, write for everything else
pub async fn tenant_by_method(request: Request, next: Next) -> Result<Response, ApiError> {
    let intent = AccessIntent::for_method(request.method());
    prepare(intent, request, next).await
}

async fn prepare(intent: AccessIntent, request: Request, next: Next) -> Result<Response, ApiError> {
    let cancel = request
        .extensions()
        .get::<RequestCancellation>()
        .cloned()
        .unwrap_or_default();

    let guard = ambient::current()?;
    intent.prepare(guard.as_ref(), &cancel.0).await?;

    Ok(next.run(request).await)
}
