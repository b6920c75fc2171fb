//! Platform installers.
//!
//! One [`PlatformInstaller`] per supported runner OS, chosen once with
//! [`Platform::detect`]. Installing returns an [`InstallLayout`] that later
//! stages receive explicitly; nothing here edits the parent's `PATH`.

mod linux;
mod macos;
mod windows;

pub use linux::{parse_os_release_codename, LinuxInstaller, PGDG_KEY_URL};
pub use macos::MacosInstaller;
pub use windows::WindowsInstaller;

use crate::error::{Result, SetupError};
use crate::exec::{tool_path, CommandRunner};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Runner operating systems this tool knows how to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

impl Platform {
    /// Probe the host OS.
    pub fn detect() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value.
    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "linux" => Ok(Platform::Linux),
            "macos" => Ok(Platform::Macos),
            "windows" => Ok(Platform::Windows),
            other => Err(SetupError::UnsupportedPlatform(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
        }
    }

    pub fn exe_suffix(&self) -> &'static str {
        match self {
            Platform::Windows => ".exe",
            _ => "",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Platform {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linux" | "ubuntu" => Ok(Platform::Linux),
            "macos" | "darwin" | "osx" => Ok(Platform::Macos),
            "windows" | "win" => Ok(Platform::Windows),
            other => Err(SetupError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// Where an installed PostgreSQL keeps its executables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLayout {
    /// Directory with `initdb`, `pg_ctl`, `createdb`, ...
    pub bin_dir: PathBuf,

    /// Client library directory; published as `PQ_LIB_DIR` (Windows only).
    pub lib_dir: Option<PathBuf>,

    /// Executable suffix on the target platform.
    pub exe_suffix: String,
}

impl InstallLayout {
    pub fn new(bin_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            lib_dir: None,
            exe_suffix: platform.exe_suffix().to_string(),
        }
    }

    pub fn with_lib_dir(mut self, lib_dir: impl Into<PathBuf>) -> Self {
        self.lib_dir = Some(lib_dir.into());
        self
    }

    /// Full path to a PostgreSQL tool.
    pub fn tool(&self, name: &str) -> PathBuf {
        tool_path(&self.bin_dir, name, &self.exe_suffix)
    }
}

/// Installs a PostgreSQL major version and reports where it landed.
#[async_trait]
pub trait PlatformInstaller: Send + Sync {
    fn platform(&self) -> Platform;

    /// Install `major_version`; failures map to [`SetupError::Install`].
    async fn install(&self, major_version: &str, runner: &dyn CommandRunner)
        -> Result<InstallLayout>;
}

/// Skips installation and uses binaries already on disk.
#[derive(Debug, Clone)]
pub struct ExistingInstall {
    platform: Platform,
    bin_dir: PathBuf,
}

impl ExistingInstall {
    pub fn new(platform: Platform, bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            bin_dir: bin_dir.into(),
        }
    }
}

#[async_trait]
impl PlatformInstaller for ExistingInstall {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn install(
        &self,
        _major_version: &str,
        _runner: &dyn CommandRunner,
    ) -> Result<InstallLayout> {
        Ok(InstallLayout::new(&self.bin_dir, self.platform))
    }
}

/// Default installer for a platform, configured from the host environment.
pub fn installer_for(platform: Platform) -> Box<dyn PlatformInstaller> {
    match platform {
        Platform::Linux => Box::new(LinuxInstaller::new()),
        Platform::Macos => Box::new(MacosInstaller::new()),
        Platform::Windows => Box::new(WindowsInstaller::from_env()),
    }
}

/// Run a `pg_config` query and return the reported directory.
pub(crate) async fn query_pg_config(
    runner: &dyn CommandRunner,
    pg_config: &Path,
    flag: &str,
) -> Result<PathBuf> {
    let spec = crate::exec::CommandSpec::new(pg_config)
        .arg(flag)
        .timeout(crate::exec::TOOL_TIMEOUT);
    let output = runner.run(&spec).await?.ensure_success(SetupError::Install)?;
    let dir = output.stdout_trimmed();
    if dir.is_empty() {
        return Err(SetupError::Install(format!(
            "`{spec}` printed nothing"
        )));
    }
    Ok(PathBuf::from(dir))
}
