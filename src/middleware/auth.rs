use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::app::AppState;
use crate::auth::{decode_jwt, Claims};
use crate::error::ApiError;

/// Authenticated caller, as carried by the bearer token
#[derive(Clone, Debug)]
pub struct AuthUser(pub Claims);

/// JWT authentication middleware that validates tokens and extracts user context
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Extract JWT from Authorization header
    let token = extract_jwt_from_headers(request.headers()).map_err(ApiError::unauthorized)?;

    // Validate and decode JWT
    let claims = decode_jwt(&token, &state.jwt_secret).map_err(|e| ApiError::unauthorized(e.to_string()))?;

    tracing::debug!("Authenticated {} for tenant {}", claims.sub, claims.tenant_id);
    request.extensions_mut().insert(AuthUser(claims));

    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.trim().to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}
