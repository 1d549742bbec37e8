// Per-request tenant scoping: the transaction guard, its passthrough twin,
// the factory choosing between them and the task-local slot holding the current one

pub mod ambient;
pub(crate) mod cancel;
pub mod context;
pub mod error;
pub mod factory;
pub mod features;
pub mod guard;
pub mod intent;
pub mod passthrough;
pub mod variables;

pub use context::TenantContext;
pub use error::GuardError;
pub use factory::{GuardFactory, RequestScope};
pub use features::{TenancyMode, TenantFeatureFlags};
pub use guard::{GuardKind, RequestGuard, TransactionGuard, TransactionMode};
pub use intent::{AccessIntent, RequestGuardExt};
pub use passthrough::PassthroughGuard;
pub use variables::SessionVariableSetter;
