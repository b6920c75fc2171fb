//! Provisioning inputs.

use crate::error::{Result, SetupError};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default superuser, password and database name.
pub const DEFAULT_USERNAME: &str = "postgres";
pub const DEFAULT_PASSWORD: &str = "postgres";
pub const DEFAULT_DATABASE: &str = "postgres";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_MAJOR_VERSION: &str = "15";

/// Every value a provisioning run reads. Built once, validated, then only
/// borrowed by the stages.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Superuser created by `initdb`; also the service name.
    pub username: String,

    /// Superuser password (SCRAM-SHA-256).
    pub password: String,

    /// Database to create. `postgres` means "use the default database".
    pub database: String,

    /// Port the server listens on.
    pub port: u16,

    /// PostgreSQL major version, e.g. `"15"`.
    pub major_version: String,

    /// Job-scoped scratch directory holding the cluster, service file and log.
    pub work_dir: PathBuf,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            port: DEFAULT_PORT,
            major_version: DEFAULT_MAJOR_VERSION.to_string(),
            work_dir: std::env::temp_dir(),
        }
    }
}

// Keeps the password out of `{:?}` output and therefore out of logs.
impl fmt::Debug for ProvisioningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("port", &self.port)
            .field("major_version", &self.major_version)
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl ProvisioningConfig {
    /// Check every field before any side effect happens.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("username", &self.username),
            ("password", &self.password),
            ("database", &self.database),
        ] {
            if value.is_empty() {
                return Err(SetupError::InvalidConfig(format!("{name} must not be empty")));
            }
            // The service file and the actions channel are line based.
            if value.contains('\n') || value.contains('\r') {
                return Err(SetupError::InvalidConfig(format!(
                    "{name} must not contain line breaks"
                )));
            }
        }

        if self.username.contains(']') || self.username.contains('[') {
            return Err(SetupError::InvalidConfig(
                "username must not contain '[' or ']' (it names a service section)".to_string(),
            ));
        }

        if self.port == 0 {
            return Err(SetupError::InvalidConfig("port must be non-zero".to_string()));
        }

        match self.major_version.parse::<u32>() {
            Ok(v) if v > 0 => {}
            _ => {
                return Err(SetupError::InvalidConfig(format!(
                    "postgres version must be a major version number, got {:?}",
                    self.major_version
                )))
            }
        }

        Ok(())
    }

    /// Whether the requested database is the one `initdb` always creates.
    pub fn uses_default_database(&self) -> bool {
        self.database == DEFAULT_DATABASE
    }

    /// The libpq service name; always the username.
    pub fn service_name(&self) -> &str {
        &self.username
    }

    pub fn cluster_dir(&self) -> PathBuf {
        self.work_dir.join("pgdata")
    }

    pub fn service_file(&self) -> PathBuf {
        self.work_dir.join("pgservice.conf")
    }

    pub fn server_log(&self) -> PathBuf {
        self.work_dir.join("postgres.log")
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}
