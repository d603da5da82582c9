//! Database connection settings
//!
//! Handles the `database` section of the application config and
//! environment variable overrides.

use serde::{Deserialize, Serialize};

/// Default administrative database used to issue `CREATE DATABASE`
pub const DEFAULT_ADMIN_DB: &str = "postgres";

/// Environment variable for the database host
pub const ENV_DB_HOST: &str = "DOCLOAD_DB_HOST";

/// Environment variable for the database port
pub const ENV_DB_PORT: &str = "DOCLOAD_DB_PORT";

/// Environment variable for the database name
pub const ENV_DB_NAME: &str = "DOCLOAD_DB_NAME";

/// Environment variable for the database user
pub const ENV_DB_USER: &str = "DOCLOAD_DB_USER";

/// Environment variable for the database password
pub const ENV_DB_PASSWORD: &str = "DOCLOAD_DB_PASSWORD";

/// TLS negotiation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Never use TLS
    Disable,
    /// Use TLS when the server offers it
    #[default]
    Prefer,
    /// Refuse to connect without TLS
    Require,
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            _ => Err(format!(
                "Unknown sslmode: {}. Use 'disable', 'prefer' or 'require'.",
                s
            )),
        }
    }
}

impl std::fmt::Display for SslMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SslMode::Disable => write!(f, "disable"),
            SslMode::Prefer => write!(f, "prefer"),
            SslMode::Require => write!(f, "require"),
        }
    }
}

/// Connection settings for the destination database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    /// Database name
    pub name: String,
    pub user: String,
    pub password: String,

    /// Optional TLS mode
    #[serde(default)]
    pub sslmode: Option<SslMode>,

    /// Create the database when it does not exist yet
    #[serde(default = "default_create_if_missing")]
    pub create_if_missing: bool,

    /// Database to connect to when creating the target database
    #[serde(default = "default_admin_db")]
    pub admin_db: String,
}

fn default_create_if_missing() -> bool {
    true
}

fn default_admin_db() -> String {
    DEFAULT_ADMIN_DB.to_string()
}

impl DatabaseSettings {
    /// Create settings for a database with default optional fields
    pub fn new(
        host: impl Into<String>,
        port: u16,
        name: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            name: name.into(),
            user: user.into(),
            password: password.into(),
            sslmode: None,
            create_if_missing: default_create_if_missing(),
            admin_db: default_admin_db(),
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var(ENV_DB_HOST) {
            self.host = host;
        }

        if let Ok(port) = std::env::var(ENV_DB_PORT)
            && let Ok(port) = port.parse()
        {
            self.port = port;
        }

        if let Ok(name) = std::env::var(ENV_DB_NAME) {
            self.name = name;
        }

        if let Ok(user) = std::env::var(ENV_DB_USER) {
            self.user = user;
        }

        if let Ok(password) = std::env::var(ENV_DB_PASSWORD) {
            self.password = password;
        }
    }

    /// Same settings pointed at another database
    pub fn with_database(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Connection target for logs, without the password
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}/{}", self.user, self.host, self.port, self.name)
    }
}
