//! apt.postgresql.org (PGDG) installation for Debian/Ubuntu runners.

use super::{query_pg_config, InstallLayout, Platform, PlatformInstaller};
use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec, PACKAGE_TIMEOUT, TOOL_TIMEOUT};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::{debug, info};

/// PGDG repository signing key.
pub const PGDG_KEY_URL: &str = "https://www.postgresql.org/media/keys/ACCC4CF8.asc";

const PGDG_REPO_URL: &str = "http://apt.postgresql.org/pub/repos/apt";
const SOURCES_LIST: &str = "/etc/apt/sources.list.d/pgdg.list";
const TRUSTED_KEY: &str = "/etc/apt/trusted.gpg.d/apt.postgresql.org.asc";
const CREATECLUSTER_DIR: &str = "/etc/postgresql-common/createcluster.d";
const CREATECLUSTER_SNIPPET: &str = "/etc/postgresql-common/createcluster.d/00-setup-postgres.conf";
const OS_RELEASE: &str = "/etc/os-release";

/// Installs `postgresql-<major>` from the PGDG apt repository.
#[derive(Debug, Clone, Default)]
pub struct LinuxInstaller {
    /// Distribution codename; probed from the host when unset.
    codename: Option<String>,
    /// Whether privileged commands need `sudo`; probed with `id -u` when unset.
    sudo: Option<bool>,
}

impl LinuxInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codename(mut self, codename: impl Into<String>) -> Self {
        self.codename = Some(codename.into());
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = Some(sudo);
        self
    }

    async fn needs_sudo(&self, runner: &dyn CommandRunner) -> bool {
        if let Some(sudo) = self.sudo {
            return sudo;
        }
        match runner.run(&CommandSpec::new("id").arg("-u")).await {
            Ok(out) if out.success() => out.stdout_trimmed() != "0",
            _ => true,
        }
    }

    async fn codename(&self, runner: &dyn CommandRunner) -> Result<String> {
        if let Some(codename) = &self.codename {
            return Ok(codename.clone());
        }

        if let Ok(content) = tokio::fs::read_to_string(OS_RELEASE).await {
            if let Some(codename) = parse_os_release_codename(&content) {
                return Ok(codename);
            }
        }

        debug!("No codename in {}, asking lsb_release", OS_RELEASE);
        let output = runner
            .run(&CommandSpec::new("lsb_release").arg("-cs"))
            .await?
            .ensure_success(SetupError::Install)?;
        let codename = output.stdout_trimmed();
        if codename.is_empty() {
            return Err(SetupError::Install(
                "could not determine distribution codename".to_string(),
            ));
        }
        Ok(codename.to_string())
    }
}

/// Wraps privileged commands in `sudo` when not running as root.
struct Privileged {
    sudo: bool,
}

impl Privileged {
    fn command(&self, program: &str) -> CommandSpec {
        if self.sudo {
            CommandSpec::new("sudo").arg(program)
        } else {
            CommandSpec::new(program)
        }
    }

    /// `tee <path>` with `contents` on stdin.
    fn write_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> CommandSpec {
        self.command("tee")
            .arg(path)
            .stdin(contents)
            .timeout(TOOL_TIMEOUT)
    }
}

#[async_trait]
impl PlatformInstaller for LinuxInstaller {
    fn platform(&self) -> Platform {
        Platform::Linux
    }

    async fn install(
        &self,
        major_version: &str,
        runner: &dyn CommandRunner,
    ) -> Result<InstallLayout> {
        let privileged = Privileged {
            sudo: self.needs_sudo(runner).await,
        };
        let codename = self.codename(runner).await?;
        info!(%codename, major_version, "Installing PostgreSQL from apt.postgresql.org");

        // Keep the package from creating and starting its own "main" cluster
        // on the port this run wants.
        runner
            .run(
                &privileged
                    .command("mkdir")
                    .args(["-p", CREATECLUSTER_DIR])
                    .timeout(TOOL_TIMEOUT),
            )
            .await?
            .ensure_success(SetupError::Install)?;
        runner
            .run(&privileged.write_file(CREATECLUSTER_SNIPPET, "create_main_cluster = false\n"))
            .await?
            .ensure_success(SetupError::Install)?;

        let entry = format!("deb {PGDG_REPO_URL} {codename}-pgdg main\n");
        runner
            .run(&privileged.write_file(SOURCES_LIST, entry))
            .await?
            .ensure_success(SetupError::Install)?;

        let key = runner
            .download(PGDG_KEY_URL)
            .await
            .map_err(|e| SetupError::Install(format!("signing key download failed: {e}")))?;
        let fingerprint = hex::encode(Sha256::digest(&key));
        info!(sha256 = %fingerprint, "Importing PGDG signing key");
        runner
            .run(&privileged.write_file(TRUSTED_KEY, key))
            .await?
            .ensure_success(SetupError::Install)?;

        runner
            .run(
                &privileged
                    .command("apt-get")
                    .arg("update")
                    .timeout(PACKAGE_TIMEOUT),
            )
            .await?
            .ensure_success(SetupError::Install)?;

        let package = format!("postgresql-{major_version}");
        runner
            .run(
                &privileged
                    .command("apt-get")
                    .args(["-y", "install", package.as_str()])
                    .timeout(PACKAGE_TIMEOUT),
            )
            .await?
            .ensure_success(SetupError::Install)?;

        let pg_config = PathBuf::from(format!("/usr/lib/postgresql/{major_version}/bin/pg_config"));
        let bin_dir = query_pg_config(runner, &pg_config, "--bindir").await?;
        info!(bin_dir = %bin_dir.display(), "PostgreSQL installed");

        Ok(InstallLayout::new(bin_dir, Platform::Linux))
    }
}

/// Extract `VERSION_CODENAME` (or `UBUNTU_CODENAME`) from `/etc/os-release`.
pub fn parse_os_release_codename(content: &str) -> Option<String> {
    let lookup = |key: &str| {
        content.lines().find_map(|line| {
            let value = line.trim().strip_prefix(key)?.strip_prefix('=')?;
            let value = value.trim().trim_matches(|c: char| c == '"' || c == '\'');
            (!value.is_empty()).then(|| value.to_string())
        })
    };
    lookup("VERSION_CODENAME").or_else(|| lookup("UBUNTU_CODENAME"))
}
