use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub tenancy: TenancyConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(skip_serializing, default)]
    pub url: Option<String>,
    pub provider: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

/// Tenant enforcement switches. All default to off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenancyConfig {
    pub context_enabled: bool,
    pub rls_enabled: bool,
    pub write_guard_enabled: bool,
    pub group_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing, default)]
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v).filter(|v| !v.trim().is_empty());
        }
        if let Ok(v) = env::var("CORP_DB_PROVIDER") {
            if !v.trim().is_empty() {
                self.database.provider = v.trim().to_string();
            }
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Tenancy overrides
        if let Some(v) = flag("USE_TENANT_INTERCEPTOR") {
            self.tenancy.context_enabled = v;
            self.tenancy.rls_enabled = v;
            self.tenancy.write_guard_enabled = v;
        }
        if let Some(v) = flag("TENANT_CONTEXT_ENABLED") {
            self.tenancy.context_enabled = v;
        }
        if let Some(v) = flag("TENANT_RLS_ENABLED") {
            self.tenancy.rls_enabled = v;
        }
        if let Some(v) = flag("TENANT_WRITE_GUARD_ENABLED") {
            self.tenancy.write_guard_enabled = v;
        }
        if let Some(v) = flag("TENANT_GROUP_MODE") {
            self.tenancy.group_mode = v;
        }

        // API overrides
        if let Some(port) = env::var("CORP_API_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.api.port = port;
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                provider: "Npgsql".to_string(),
                max_connections: 10,
                connection_timeout: 30,
            },
            tenancy: TenancyConfig::default(),
            api: ApiConfig { port: 3000 },
            security: SecurityConfig {
                jwt_secret: "corp-development-secret".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                provider: "Npgsql".to_string(),
                max_connections: 20,
                connection_timeout: 10,
            },
            tenancy: TenancyConfig::default(),
            api: ApiConfig { port: 3000 },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                provider: "Npgsql".to_string(),
                max_connections: 50,
                connection_timeout: 5,
            },
            tenancy: TenancyConfig::default(),
            api: ApiConfig { port: 3000 },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
            },
        }
    }
}

/// Boolean environment flag. Unset or unparseable reads as `None`.
fn flag(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

// Helper macro for common checks
#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}
