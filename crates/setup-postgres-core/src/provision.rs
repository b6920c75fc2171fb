//! Optional application database creation.

use crate::config::ProvisioningConfig;
use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec, TOOL_TIMEOUT};
use crate::install::InstallLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// What the provisioner did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionOutcome {
    Created,
    /// The requested database is the default one `initdb` already made.
    Skipped,
}

/// `createdb --owner=<user> -- <database>`, authenticating through the
/// service entry rather than connection flags. The `--` keeps a name that
/// starts with `-` from being read as an option.
pub fn createdb_command(
    config: &ProvisioningConfig,
    layout: &InstallLayout,
    service_file: &Path,
) -> CommandSpec {
    CommandSpec::new(layout.tool("createdb"))
        .arg(format!("--owner={}", config.username))
        .arg("--")
        .arg(&config.database)
        .env("PGSERVICEFILE", service_file.display().to_string())
        .env("PGSERVICE", config.service_name())
        .timeout(TOOL_TIMEOUT)
}

/// Create the configured database unless it is `postgres`.
pub async fn provision_database(
    runner: &dyn CommandRunner,
    config: &ProvisioningConfig,
    layout: &InstallLayout,
    service_file: &Path,
) -> Result<ProvisionOutcome> {
    if config.uses_default_database() {
        info!(database = %config.database, "Default database requested, nothing to create");
        return Ok(ProvisionOutcome::Skipped);
    }

    info!(database = %config.database, owner = %config.username, "Creating database");
    runner
        .run(&createdb_command(config, layout, service_file))
        .await?
        .ensure_success(SetupError::Provisioning)?;
    Ok(ProvisionOutcome::Created)
}
