pub mod auth;
pub mod guard;
pub mod intent;
pub mod tenant;

pub use auth::{jwt_auth_middleware, AuthUser};
pub use guard::{ambient_guard_middleware, RequestCancellation, RequestSession};
pub use intent::{tenant_by_method, tenant_read, tenant_write};
pub use tenant::{tenant_context_middleware, ClaimsTenantResolver, TenantResolver};
