use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::database::session::{DbSession, Statement};
use crate::tenancy::cancel::cancellable;
use crate::tenancy::context::TenantContext;
use crate::tenancy::error::GuardError;
use crate::tenancy::features::TenancyMode;

pub const TENANT_VARIABLE: &str = "app.tenant_id";
pub const GROUP_VARIABLE: &str = "app.group_id";

/// Stamps the tenant session variables on the transaction attached to a session.
///
/// Every value is bound as a parameter of `set_config(.., true)`, so it only lives as long
/// as the transaction. In two-level mode the group variable goes first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionVariableSetter {
    mode: TenancyMode,
}

impl SessionVariableSetter {
    pub fn new(mode: TenancyMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TenancyMode {
        self.mode
    }

    /// Statements for a context, in issue order. Fails before producing anything if an
    /// id the mode requires is missing.
    pub fn statements(&self, tenant: &TenantContext) -> Result<Vec<Statement>, GuardError> {
        let tenant_id = tenant.require_tenant_id()?;
        let group_id = match self.mode {
            TenancyMode::TwoLevel => Some(tenant.require_group_id()?),
            TenancyMode::SingleLevel => None,
        };

        let mut statements = Vec::with_capacity(2);
        if let Some(group_id) = group_id {
            statements.push(set_local(GROUP_VARIABLE).bind(group_id.to_string()));
        }
        statements.push(set_local(TENANT_VARIABLE).bind(tenant_id.to_string()));
        Ok(statements)
    }

    /// Issue the statements against the session's current transaction
    pub async fn apply(
        &self,
        session: &dyn DbSession,
        tenant: &TenantContext,
        cancel: &CancellationToken,
    ) -> Result<(), GuardError> {
        let statements = self.statements(tenant)?;
        run(session, &statements, cancel).await
    }
}

/// Issue prepared statements one at a time, in order
pub(crate) async fn run(
    session: &dyn DbSession,
    statements: &[Statement],
    cancel: &CancellationToken,
) -> Result<(), GuardError> {
    for statement in statements {
        cancellable(cancel, session.execute(statement)).await?;
        debug!("Session variable set: {}", statement.sql());
    }
    Ok(())
}

fn set_local(variable: &'static str) -> Statement {
    Statement::new(format!("select set_config('{}', $1, true)", variable))
}
