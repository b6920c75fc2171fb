//! Cluster initialization and server start.

use crate::config::ProvisioningConfig;
use crate::error::{Result, SetupError};
use crate::exec::{CommandRunner, CommandSpec, TOOL_TIMEOUT};
use crate::install::InstallLayout;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed cluster encoding.
pub const ENCODING: &str = "UTF-8";

/// Fixed cluster locale.
pub const LOCALE: &str = "en_US.UTF-8";

/// Superuser authentication method.
pub const AUTH_METHOD: &str = "scram-sha-256";

/// Disables unix-domain sockets so the server never competes with a
/// system-wide instance for `/var/run/postgresql`.
pub const DISABLE_UNIX_SOCKETS: &str = "unix_socket_directories = ''";

/// An initialized and started cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDirectory {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl ClusterDirectory {
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("postgresql.conf")
    }
}

/// Drives `initdb` and `pg_ctl` for one configuration.
pub struct ClusterBootstrapper<'a> {
    config: &'a ProvisioningConfig,
    layout: &'a InstallLayout,
}

impl<'a> ClusterBootstrapper<'a> {
    pub fn new(config: &'a ProvisioningConfig, layout: &'a InstallLayout) -> Self {
        Self { config, layout }
    }

    pub fn initdb_command(&self, password_file: &Path) -> CommandSpec {
        CommandSpec::new(self.layout.tool("initdb"))
            .arg(format!("--pgdata={}", self.config.cluster_dir().display()))
            .arg(format!("--username={}", self.config.username))
            .arg(format!("--pwfile={}", password_file.display()))
            .arg(format!("--auth={AUTH_METHOD}"))
            .arg(format!("--encoding={ENCODING}"))
            .arg(format!("--locale={LOCALE}"))
            .timeout(TOOL_TIMEOUT)
    }

    /// `pg_ctl start`, waiting for the server to accept connections.
    ///
    /// Server output goes to a log file; otherwise the postmaster would keep
    /// the captured pipes open for the rest of the job.
    pub fn start_command(&self) -> CommandSpec {
        CommandSpec::new(self.layout.tool("pg_ctl"))
            .arg("start")
            .arg(format!("--pgdata={}", self.config.cluster_dir().display()))
            .arg(format!("--log={}", self.config.server_log().display()))
            .arg("--wait")
            .timeout(TOOL_TIMEOUT)
    }

    /// Initialize, configure and start the cluster.
    pub async fn bootstrap(&self, runner: &dyn CommandRunner) -> Result<ClusterDirectory> {
        let data_dir = self.config.cluster_dir();
        ensure_fresh_directory(&data_dir)?;
        std::fs::create_dir_all(self.config.work_dir())?;

        info!(data_dir = %data_dir.display(), username = %self.config.username, "Initializing cluster");
        {
            // initdb reads the password from a file when not interactive.
            // The file is removed when this scope ends, whatever initdb did.
            let password_file = write_password_file(self.config)?;
            let output = runner.run(&self.initdb_command(password_file.path())).await;
            password_file.close()?;
            output?.ensure_success(SetupError::Initialization)?;
        }

        let cluster = ClusterDirectory {
            data_dir,
            log_file: self.config.server_log(),
        };

        let appended = append_settings(&cluster.config_file(), self.config.port)?;
        debug!(appended, config = %cluster.config_file().display(), "Server settings written");

        info!(port = self.config.port, "Starting server");
        runner
            .run(&self.start_command())
            .await?
            .ensure_success(SetupError::Start)?;

        Ok(cluster)
    }
}

/// Lines appended to `postgresql.conf` for `port`.
pub fn server_settings(port: u16) -> [String; 2] {
    [DISABLE_UNIX_SOCKETS.to_string(), format!("port = {port}")]
}

/// Append the server settings to `postgresql.conf`, skipping any line that
/// is already active. Returns how many lines were appended.
pub fn append_settings(config_file: &Path, port: u16) -> Result<usize> {
    let existing = std::fs::read_to_string(config_file).map_err(|e| {
        SetupError::Initialization(format!(
            "cannot read {}: {e}",
            config_file.display()
        ))
    })?;

    let missing: Vec<String> = server_settings(port)
        .into_iter()
        .filter(|setting| !existing.lines().any(|line| line.trim() == setting.as_str()))
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let mut file = OpenOptions::new().append(true).open(config_file)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    for setting in &missing {
        writeln!(file, "{setting}")?;
    }
    Ok(missing.len())
}

fn ensure_fresh_directory(dir: &Path) -> Result<()> {
    if dir.exists() && dir.read_dir()?.next().is_some() {
        return Err(SetupError::Initialization(format!(
            "directory {} exists and is not empty",
            dir.display()
        )));
    }
    Ok(())
}

fn write_password_file(config: &ProvisioningConfig) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("pwfile")
        .tempfile_in(config.work_dir())?;
    writeln!(file, "{}", config.password)?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeResponse, RecordingRunner};
    use crate::install::Platform;

    fn config_in(dir: &Path) -> ProvisioningConfig {
        ProvisioningConfig {
            username: "alice".to_string(),
            password: "secret".to_string(),
            port: 5433,
            work_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn layout() -> InstallLayout {
        InstallLayout::new("/opt/pg/bin", Platform::Linux)
    }

    fn count_exact(content: &str, line: &str) -> usize {
        content.lines().filter(|l| l.trim() == line).count()
    }

    #[test]
    fn test_initdb_arguments() {
        let config = config_in(Path::new("/tmp/run"));
        let layout = layout();
        let spec = ClusterBootstrapper::new(&config, &layout)
            .initdb_command(Path::new("/tmp/run/pwfile"));

        assert_eq!(spec.program, PathBuf::from("/opt/pg/bin/initdb"));
        assert_eq!(
            spec.args,
            vec![
                "--pgdata=/tmp/run/pgdata",
                "--username=alice",
                "--pwfile=/tmp/run/pwfile",
                "--auth=scram-sha-256",
                "--encoding=UTF-8",
                "--locale=en_US.UTF-8",
            ]
        );
    }

    #[test]
    fn test_settings_are_appended_once() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("postgresql.conf");
        std::fs::write(&conf, "#port = 5432\n#unix_socket_directories = '/tmp'\n").unwrap();

        assert_eq!(append_settings(&conf, 5433).unwrap(), 2);
        assert_eq!(append_settings(&conf, 5433).unwrap(), 0);
        assert_eq!(append_settings(&conf, 5433).unwrap(), 0);

        let content = std::fs::read_to_string(&conf).unwrap();
        assert_eq!(count_exact(&content, "unix_socket_directories = ''"), 1);
        assert_eq!(count_exact(&content, "port = 5433"), 1);
        // Commented defaults stay untouched.
        assert!(content.starts_with("#port = 5432\n"));
    }

    #[test]
    fn test_settings_start_on_a_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("postgresql.conf");
        std::fs::write(&conf, "max_connections = 100").unwrap();

        append_settings(&conf, 5432).unwrap();
        let content = std::fs::read_to_string(&conf).unwrap();
        assert_eq!(
            content,
            "max_connections = 100\nunix_socket_directories = ''\nport = 5432\n"
        );
    }

    #[test]
    fn test_missing_config_is_initialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = append_settings(&dir.path().join("postgresql.conf"), 5432).unwrap_err();
        assert!(matches!(err, SetupError::Initialization(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_initializes_configures_and_starts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let layout = layout();
        let runner = RecordingRunner::simulating_postgres();

        let cluster = ClusterBootstrapper::new(&config, &layout)
            .bootstrap(&runner)
            .await
            .unwrap();
        assert_eq!(cluster.data_dir, dir.path().join("pgdata"));

        let content = std::fs::read_to_string(cluster.config_file()).unwrap();
        assert_eq!(count_exact(&content, "unix_socket_directories = ''"), 1);
        assert_eq!(count_exact(&content, "port = 5433"), 1);

        let tools: Vec<String> = runner.calls().iter().map(|c| c.tool_name()).collect();
        assert_eq!(tools, vec!["initdb", "pg_ctl"]);

        let start = &runner.invocations_of("pg_ctl")[0];
        assert_eq!(start.args[0], "start");
        assert!(start.args.contains(&"--wait".to_string()));
    }

    #[tokio::test]
    async fn test_password_file_is_removed_after_initdb() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let layout = layout();
        let runner = RecordingRunner::simulating_postgres();

        ClusterBootstrapper::new(&config, &layout)
            .bootstrap(&runner)
            .await
            .unwrap();

        let initdb = &runner.invocations_of("initdb")[0];
        let pwfile = PathBuf::from(initdb.flag_value("--pwfile").unwrap());
        assert!(pwfile.starts_with(dir.path()));
        assert!(!pwfile.exists(), "password file should be deleted");
    }

    #[tokio::test]
    async fn test_password_file_is_removed_when_initdb_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let layout = layout();
        let runner = RecordingRunner::new().respond(
            "initdb",
            "--locale=en_US.UTF-8",
            FakeResponse::fail(1, "initdb: error: invalid locale name \"en_US.UTF-8\""),
        );

        let err = ClusterBootstrapper::new(&config, &layout)
            .bootstrap(&runner)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::Initialization(_)));

        let initdb = &runner.invocations_of("initdb")[0];
        let pwfile = PathBuf::from(initdb.flag_value("--pwfile").unwrap());
        assert!(!pwfile.exists());
        assert!(runner.invocations_of("pg_ctl").is_empty());
    }

    #[tokio::test]
    async fn test_non_empty_data_dir_is_rejected_before_initdb() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(config.cluster_dir()).unwrap();
        std::fs::write(config.cluster_dir().join("PG_VERSION"), "14\n").unwrap();

        let layout = layout();
        let runner = RecordingRunner::simulating_postgres();
        let err = ClusterBootstrapper::new(&config, &layout)
            .bootstrap(&runner)
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::Initialization(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_start_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let layout = layout();
        let runner = RecordingRunner::simulating_postgres().respond(
            "pg_ctl",
            "start",
            FakeResponse::fail(1, "pg_ctl: could not start server"),
        );

        let err = ClusterBootstrapper::new(&config, &layout)
            .bootstrap(&runner)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::Start(_)));
    }
}
