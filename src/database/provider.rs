use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::manager::DatabaseError;

/// Storage engines the application can run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatabaseProvider {
    Postgres,
    Sqlite,
    Memory,
}

impl DatabaseProvider {
    /// Provider name as written in configuration
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseProvider::Postgres => "Npgsql",
            DatabaseProvider::Sqlite => "Sqlite",
            DatabaseProvider::Memory => "Memory",
        }
    }
}

impl FromStr for DatabaseProvider {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npgsql" | "postgres" | "postgresql" => Ok(DatabaseProvider::Postgres),
            "sqlite" => Ok(DatabaseProvider::Sqlite),
            "memory" => Ok(DatabaseProvider::Memory),
            other => Err(DatabaseError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for DatabaseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the active storage engine can enforce. Process-wide and read-only after startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatabaseCapability {
    pub provider: DatabaseProvider,
    pub supports_row_level_security: bool,
    pub supports_tenant_context: bool,
}

impl DatabaseCapability {
    pub fn for_provider(provider: DatabaseProvider) -> Self {
        let postgres = provider == DatabaseProvider::Postgres;
        Self {
            provider,
            supports_row_level_security: postgres,
            supports_tenant_context: postgres,
        }
    }

    /// Resolve from a configured provider name
    pub fn from_name(name: &str) -> Result<Self, DatabaseError> {
        Ok(Self::for_provider(name.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_names_case_insensitively() {
        assert_eq!("Npgsql".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::Postgres);
        assert_eq!("postgresql".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::Postgres);
        assert_eq!("SQLITE".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::Sqlite);
        assert_eq!(" memory ".parse::<DatabaseProvider>().unwrap(), DatabaseProvider::Memory);
        assert!(matches!(
            "oracle".parse::<DatabaseProvider>(),
            Err(DatabaseError::UnknownProvider(name)) if name == "oracle"
        ));
    }

    #[test]
    fn only_postgres_supports_tenant_context() {
        let pg = DatabaseCapability::from_name("Npgsql").unwrap();
        assert!(pg.supports_tenant_context);
        assert!(pg.supports_row_level_security);

        for name in ["Sqlite", "memory"] {
            let cap = DatabaseCapability::from_name(name).unwrap();
            assert!(!cap.supports_tenant_context);
            assert!(!cap.supports_row_level_security);
        }
    }
}
