//! GitHub Actions step channel.
//!
//! A step hands values to later steps by appending lines to the files named
//! by `GITHUB_OUTPUT`, `GITHUB_ENV` and `GITHUB_PATH`. When a variable is not
//! set (local runs) the values are printed to stdout instead.

use crate::error::Result;
use crate::install::InstallLayout;
use crate::report::SetupOutputs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files a step can publish through. Resolved once, passed explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionsChannel {
    pub output_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub path_file: Option<PathBuf>,
}

impl ActionsChannel {
    /// Read `GITHUB_OUTPUT`, `GITHUB_ENV` and `GITHUB_PATH`.
    pub fn from_env() -> Self {
        let file = |key: &str| {
            std::env::var_os(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self {
            output_file: file("GITHUB_OUTPUT"),
            env_file: file("GITHUB_ENV"),
            path_file: file("GITHUB_PATH"),
        }
    }

    /// Channel that prints everything to stdout.
    pub fn stdout() -> Self {
        Self::default()
    }

    /// Publish the outputs plus the environment later steps need:
    /// the binary directory on `PATH`, `PGSERVICEFILE`, and `PQ_LIB_DIR`
    /// when the layout has a library directory.
    ///
    /// Outputs are appended last, so a failed env or path append leaves no
    /// outputs behind.
    pub fn publish(
        &self,
        outputs: &SetupOutputs,
        layout: &InstallLayout,
        service_file: &Path,
    ) -> Result<()> {
        let mut env_lines = vec![format!("PGSERVICEFILE={}", service_file.display())];
        if let Some(lib_dir) = &layout.lib_dir {
            env_lines.push(format!("PQ_LIB_DIR={}", lib_dir.display()));
        }
        let path_lines = [layout.bin_dir.display().to_string()];
        let output_lines: Vec<String> = outputs
            .pairs()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        emit(self.env_file.as_deref(), &env_lines)?;
        emit(self.path_file.as_deref(), &path_lines)?;
        emit(self.output_file.as_deref(), &output_lines)?;
        Ok(())
    }
}

fn emit(target: Option<&Path>, lines: &[String]) -> Result<()> {
    match target {
        Some(path) => {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            for line in lines {
                writeln!(file, "{line}")?;
            }
            debug!(path = %path.display(), count = lines.len(), "Appended to actions file");
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for line in lines {
                writeln!(out, "{line}")?;
            }
        }
    }
    Ok(())
}
