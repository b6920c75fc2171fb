//! Homebrew installation for macOS runners.

use super::{InstallLayout, Platform, PlatformInstaller};
use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec, PACKAGE_TIMEOUT, TOOL_TIMEOUT};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// Installs the `postgresql@<major>` formula and force-links it.
#[derive(Debug, Clone)]
pub struct MacosInstaller {
    brew: PathBuf,
}

impl Default for MacosInstaller {
    fn default() -> Self {
        Self {
            brew: PathBuf::from("brew"),
        }
    }
}

impl MacosInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    fn brew(&self) -> CommandSpec {
        CommandSpec::new(&self.brew)
    }
}

#[async_trait]
impl PlatformInstaller for MacosInstaller {
    fn platform(&self) -> Platform {
        Platform::Macos
    }

    async fn install(
        &self,
        major_version: &str,
        runner: &dyn CommandRunner,
    ) -> Result<InstallLayout> {
        let formula = format!("postgresql@{major_version}");
        info!(%formula, "Installing PostgreSQL with Homebrew");

        runner
            .run(
                &self
                    .brew()
                    .args(["install", formula.as_str()])
                    .timeout(PACKAGE_TIMEOUT),
            )
            .await?
            .ensure_success(SetupError::Install)?;

        // Versioned formulae are keg-only, and a runner image may already have
        // another version linked.
        runner
            .run(
                &self
                    .brew()
                    .args(["link", "--force", "--overwrite", formula.as_str()])
                    .timeout(TOOL_TIMEOUT),
            )
            .await?
            .ensure_success(SetupError::Install)?;

        let prefix = runner
            .run(&self.brew().arg("--prefix").timeout(TOOL_TIMEOUT))
            .await?
            .ensure_success(SetupError::Install)?;
        let prefix = prefix.stdout_trimmed();
        if prefix.is_empty() {
            return Err(SetupError::Install("`brew --prefix` printed nothing".to_string()));
        }

        let bin_dir = PathBuf::from(prefix).join("bin");
        info!(bin_dir = %bin_dir.display(), "PostgreSQL linked");
        Ok(InstallLayout::new(bin_dir, Platform::Macos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeResponse, RecordingRunner};

    #[tokio::test]
    async fn test_installs_and_force_links_formula() {
        let runner = RecordingRunner::simulating_postgres();
        let layout = MacosInstaller::new().install("14", &runner).await.unwrap();

        assert_eq!(layout.bin_dir, PathBuf::from("/opt/homebrew/bin"));
        let rendered: Vec<String> = runner.calls().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "brew install postgresql@14",
                "brew link --force --overwrite postgresql@14",
                "brew --prefix",
            ]
        );
    }

    #[tokio::test]
    async fn test_brew_failure_is_install_error() {
        let runner = RecordingRunner::new().respond(
            "brew",
            "install",
            FakeResponse::fail(1, "Error: No available formula with the name \"postgresql@99\""),
        );
        let err = MacosInstaller::new().install("99", &runner).await.unwrap_err();
        assert!(matches!(err, SetupError::Install(_)));
        assert_eq!(runner.calls().len(), 1);
    }
}
