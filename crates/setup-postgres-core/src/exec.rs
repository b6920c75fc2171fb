//! External command execution.
//!
//! Every side effect outside the process goes through a [`CommandRunner`]:
//! package managers, `initdb`, `pg_ctl`, `createdb` and the signing key
//! download. [`SystemRunner`] does the real work, [`DryRunRunner`] only
//! records what would run, and `crate::fakes::RecordingRunner` scripts
//! responses for tests.

use crate::error::{Result, SetupError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Timeout for package-manager invocations.
pub const PACKAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout for PostgreSQL's own tools.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// One external command: program, arguments, extra environment and
/// optional stdin bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Set on the child only; the parent environment is never touched.
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// File stem of the program, e.g. `initdb` for `/usr/lib/postgresql/15/bin/initdb`.
    pub fn tool_name(&self) -> String {
        self.program
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Value of a `--flag=value` argument, if present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let prefix = format!("{flag}=");
        self.args
            .iter()
            .find_map(|a| a.strip_prefix(prefix.as_str()))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Rendered command line, for diagnostics.
    pub command: String,

    /// Exit code (-1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stdout, the usual payload of query tools like `pg_config`.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Combined output used as failure detail.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        let stdout = self.stdout.trim();
        match (stderr.is_empty(), stdout.is_empty()) {
            (false, false) => format!("{stderr}\n{stdout}"),
            (false, true) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (true, true) => "no output".to_string(),
        }
    }

    /// Turn a non-zero exit into the stage's error class.
    pub fn ensure_success(self, on_failure: impl FnOnce(String) -> SetupError) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(on_failure(format!(
                "`{}` exited with code {}: {}",
                self.command,
                self.exit_code,
                self.diagnostic()
            )))
        }
    }
}

/// Executes external commands and downloads on behalf of the stages.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command to completion. A non-zero exit is not an error here;
    /// callers decide with [`CommandOutput::ensure_success`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Fetch a URL and return the body.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(command = %spec, "Running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SetupError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        // Feed stdin concurrently so a child echoing its input (tee) cannot
        // block on a full stdout pipe.
        let writer = match (child.stdin.take(), &spec.stdin) {
            (Some(mut stdin), Some(input)) => {
                let input = input.clone();
                Some(tokio::spawn(async move {
                    stdin.write_all(&input).await?;
                    stdin.shutdown().await
                }))
            }
            _ => None,
        };

        let output = match spec.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| SetupError::Timeout {
                    program: spec.tool_name(),
                    seconds: limit.as_secs(),
                })??,
            None => child.wait_with_output().await?,
        };

        if let Some(writer) = writer {
            writer.await.map_err(std::io::Error::other)??;
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(tool = %spec.tool_name(), exit_code, duration_ms, "Command finished");

        Ok(CommandOutput {
            command: spec.to_string(),
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        debug!(%url, "Downloading");
        let response = reqwest::get(url).await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Records commands without running them.
///
/// Query commands answer with a shell-style placeholder (`$(pg_config
/// --bindir)`) so later commands render against it, which is enough to
/// print a readable plan.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    steps: Mutex<Vec<String>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rendered steps, in order.
    pub fn steps(&self) -> Vec<String> {
        self.steps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn push(&self, step: String) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(step);
        }
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let command = spec.to_string();
        self.push(command.clone());
        Ok(CommandOutput {
            stdout: format!("$({command})"),
            command,
            exit_code: 0,
            stderr: String::new(),
            duration_ms: 0,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.push(format!("download {url}"));
        Ok(Vec::new())
    }
}

/// Join a tool name onto a binary directory with the platform's executable
/// suffix.
pub fn tool_path(bin_dir: &Path, tool: &str, exe_suffix: &str) -> PathBuf {
    bin_dir.join(format!("{tool}{exe_suffix}"))
}
