//! libpq connection service file (`pg_service.conf` format).

use crate::config::ProvisioningConfig;
use crate::error::Result;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Host written to the service entry. Unix sockets are disabled, so clients
/// must come in over TCP.
pub const SERVICE_HOST: &str = "localhost";

/// One named section of a connection service file.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl ServiceDefinition {
    /// The entry for a provisioning run; named after the superuser.
    pub fn from_config(config: &ProvisioningConfig) -> Self {
        Self {
            name: config.service_name().to_string(),
            host: SERVICE_HOST.to_string(),
            port: config.port,
            user: config.username.clone(),
            password: config.password.clone(),
            dbname: config.database.clone(),
        }
    }

    /// File contents: the section header followed by one `key=value` per line.
    pub fn render(&self) -> String {
        format!(
            "[{}]\nhost={}\nport={}\nuser={}\npassword={}\ndbname={}\n",
            self.name, self.host, self.port, self.user, self.password, self.dbname
        )
    }

    /// Create or overwrite `path` with this single entry.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render())?;
        info!(service = %self.name, path = %path.display(), "Connection service registered");
        Ok(())
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .finish()
    }
}
