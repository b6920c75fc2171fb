//! Chocolatey installation for Windows runners.

use super::{query_pg_config, InstallLayout, Platform, PlatformInstaller};
use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec, PACKAGE_TIMEOUT, TOOL_TIMEOUT};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

/// `sc stop` exit code for "The service has not been started."
const SERVICE_NOT_ACTIVE: i32 = 1062;

/// Installs the `postgresql<major>` Chocolatey package and stops the
/// Windows service it starts.
#[derive(Debug, Clone)]
pub struct WindowsInstaller {
    program_files: PathBuf,
    arch: String,
}

impl WindowsInstaller {
    pub fn new(program_files: impl Into<PathBuf>, arch: impl Into<String>) -> Self {
        Self {
            program_files: program_files.into(),
            arch: arch.into(),
        }
    }

    /// `%PROGRAMFILES%` and the host architecture.
    pub fn from_env() -> Self {
        let program_files = std::env::var_os("PROGRAMFILES")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(r"C:\Program Files"));
        Self::new(program_files, windows_arch(std::env::consts::ARCH))
    }

    /// Service name the installer is told to use, e.g. `postgresql-x64-15`.
    ///
    /// Set explicitly because the package's own naming is unreliable when
    /// another version is already registered.
    pub fn service_name(&self, major_version: &str) -> String {
        format!("postgresql-{}-{}", self.arch, major_version)
    }

    fn pg_config(&self, major_version: &str) -> PathBuf {
        self.program_files
            .join("PostgreSQL")
            .join(major_version)
            .join("bin")
            .join("pg_config.exe")
    }
}

/// Map a Rust architecture name to the one EnterpriseDB uses.
fn windows_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "x64",
        "x86" => "x86",
        "aarch64" => "arm64",
        other => other,
    }
}

#[async_trait]
impl PlatformInstaller for WindowsInstaller {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    async fn install(
        &self,
        major_version: &str,
        runner: &dyn CommandRunner,
    ) -> Result<InstallLayout> {
        let package = format!("postgresql{major_version}");
        let service = self.service_name(major_version);
        info!(%package, %service, "Installing PostgreSQL with Chocolatey");

        runner
            .run(
                &CommandSpec::new("choco")
                    .args(["install", package.as_str(), "--yes", "--no-progress"])
                    .arg("--params")
                    .arg(format!("/Service:{service}"))
                    .timeout(PACKAGE_TIMEOUT),
            )
            .await?
            .ensure_success(SetupError::Install)?;

        // The package starts its service on 5432; free the port for ours.
        let stop = runner
            .run(
                &CommandSpec::new("sc.exe")
                    .args(["stop", service.as_str()])
                    .timeout(TOOL_TIMEOUT),
            )
            .await?;
        if stop.exit_code == SERVICE_NOT_ACTIVE {
            warn!(%service, "Service was not running");
        } else {
            stop.ensure_success(SetupError::Install)?;
        }

        let pg_config = self.pg_config(major_version);
        let bin_dir = query_pg_config(runner, &pg_config, "--bindir").await?;
        let lib_dir = query_pg_config(runner, &pg_config, "--libdir").await?;
        info!(bin_dir = %bin_dir.display(), lib_dir = %lib_dir.display(), "PostgreSQL installed");

        Ok(InstallLayout::new(bin_dir, Platform::Windows).with_lib_dir(lib_dir))
    }
}
