use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use crate::database::manager::DatabaseError;
use crate::tenancy::variables::{GROUP_VARIABLE, TENANT_VARIABLE};

const POLICY_NAME: &str = "rls_policy";
const GROUP_TENANT_FUNCTION: &str = "rls_group_tenant_policy";
const TENANT_FUNCTION: &str = "rls_tenant_policy";

/// Which columns a table's policy checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PolicyScope {
    /// `group_id` and `tenant_id`
    GroupAndTenant,
    /// `tenant_id` only
    TenantOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyTable {
    pub name: String,
    pub scope: PolicyScope,
}

/// Row-level security DDL for the tenant-scoped tables.
///
/// Policies read the same session variables the guard stamps, so a row is visible only
/// inside a transaction stamped for its tenant (and group, when one is set).
#[derive(Debug, Clone, Default, Serialize)]
pub struct RlsPolicy {
    tables: Vec<PolicyTable>,
}

impl RlsPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The application's tenant-scoped tables
    pub fn corp() -> Self {
        let group_tables = [
            "organization",
            "entity",
            "entity_relationship",
            "entity_role",
            "organization_member",
            "document",
            "extracted_field",
            "checklist",
            "task_record",
            "task_template",
        ];
        let tenant_tables = ["person", "checklist_template"];

        let tables = group_tables
            .iter()
            .map(|name| (name, PolicyScope::GroupAndTenant))
            .chain(tenant_tables.iter().map(|name| (name, PolicyScope::TenantOnly)))
            .map(|(name, scope)| PolicyTable {
                name: name.to_string(),
                scope,
            })
            .collect();
        Self { tables }
    }

    pub fn with_table(mut self, name: &str, scope: PolicyScope) -> Result<Self, DatabaseError> {
        if !is_identifier(name) {
            return Err(DatabaseError::InvalidIdentifier(name.to_string()));
        }
        if !self.tables.iter().any(|t| t.name == name) {
            self.tables.push(PolicyTable {
                name: name.to_string(),
                scope,
            });
        }
        Ok(self)
    }

    pub fn tables(&self) -> &[PolicyTable] {
        &self.tables
    }

    /// Functions first, then RLS and one policy per table
    pub fn enable_statements(&self) -> Vec<String> {
        let mut statements = vec![group_tenant_function(), tenant_function()];

        for table in &self.tables {
            let check = match table.scope {
                PolicyScope::GroupAndTenant => format!("{}(group_id, tenant_id)", GROUP_TENANT_FUNCTION),
                PolicyScope::TenantOnly => format!("{}(tenant_id)", TENANT_FUNCTION),
            };
            statements.push(format!("ALTER TABLE {} ENABLE ROW LEVEL SECURITY", table.name));
            statements.push(format!(
                "CREATE POLICY {} ON {} FOR ALL USING ({})",
                POLICY_NAME, table.name, check
            ));
        }

        statements
    }

    /// Reverse of [`enable_statements`](RlsPolicy::enable_statements)
    pub fn disable_statements(&self) -> Vec<String> {
        let mut statements: Vec<String> = self
            .tables
            .iter()
            .map(|t| format!("DROP POLICY IF EXISTS {} ON {}", POLICY_NAME, t.name))
            .collect();

        statements.extend(
            self.tables
                .iter()
                .map(|t| format!("ALTER TABLE {} DISABLE ROW LEVEL SECURITY", t.name)),
        );

        statements.push(format!("DROP FUNCTION IF EXISTS {}(uuid, uuid)", GROUP_TENANT_FUNCTION));
        statements.push(format!("DROP FUNCTION IF EXISTS {}(uuid)", TENANT_FUNCTION));
        statements
    }

    /// Run statements in a single transaction
    pub async fn apply(pool: &PgPool, statements: &[String]) -> Result<(), DatabaseError> {
        let mut tx = pool.begin().await?;
        for statement in statements {
            sqlx::query(statement.as_str()).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Applied {} RLS statements", statements.len());
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && name.len() <= 63
}

// An unset custom setting reads as NULL before first use and as '' after a local set
// has been reset, so both count as absent.
fn group_tenant_function() -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {function}(
    table_group_id uuid,
    table_tenant_id uuid
) RETURNS boolean AS $$
BEGIN
    RETURN (
        nullif(current_setting('{tenant}', true), '') IS NOT NULL
        AND table_tenant_id = uuid(current_setting('{tenant}', true))
        AND (
            nullif(current_setting('{group}', true), '') IS NULL
            OR table_group_id = uuid(current_setting('{group}', true))
        )
    );
END;
$$ LANGUAGE plpgsql SECURITY DEFINER"#,
        function = GROUP_TENANT_FUNCTION,
        tenant = TENANT_VARIABLE,
        group = GROUP_VARIABLE,
    )
}

fn tenant_function() -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION {function}(
    table_tenant_id uuid
) RETURNS boolean AS $$
BEGIN
    RETURN (
        nullif(current_setting('{tenant}', true), '') IS NOT NULL
        AND table_tenant_id = uuid(current_setting('{tenant}', true))
    );
END;
$$ LANGUAGE plpgsql SECURITY DEFINER"#,
        function = TENANT_FUNCTION,
        tenant = TENANT_VARIABLE,
    )
}
