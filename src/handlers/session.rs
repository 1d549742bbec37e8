use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::database::session::Statement;
use crate::error::ApiError;
use crate::middleware::{RequestCancellation, RequestSession};
use crate::tenancy::cancel::cancellable;
use crate::tenancy::variables::{GROUP_VARIABLE, TENANT_VARIABLE};
use crate::tenancy::{ambient, TenantContext};

/// Reports the resolved tenant next to the session variables the database actually sees
pub async fn session_info(
    Extension(tenant): Extension<TenantContext>,
    Extension(RequestSession(session)): Extension<RequestSession>,
    Extension(RequestCancellation(cancel)): Extension<RequestCancellation>,
) -> Result<Json<Value>, ApiError> {
    let mut seen = serde_json::Map::new();
    for variable in [GROUP_VARIABLE, TENANT_VARIABLE] {
        let statement = Statement::new(format!("select current_setting('{}', true)", variable));
        let rows = cancellable(&cancel, session.fetch_json(&statement)).await?;
        let value = rows
            .first()
            .and_then(Value::as_object)
            .and_then(|row| row.values().next())
            .cloned()
            .filter(|v| v.as_str() != Some(""))
            .unwrap_or(Value::Null);
        seen.insert(variable.to_string(), value);
    }

    let guard = ambient::current()?;

    Ok(Json(json!({
        "success": true,
        "data": {
            "tenant_id": tenant.tenant_id(),
            "group_id": tenant.group_id(),
            "hostname": tenant.hostname(),
            "subdomain": tenant.subdomain(),
            "guard": guard.kind(),
            "transaction": session.current_transaction().await.is_some(),
            "session_variables": seen,
        }
    })))
}
