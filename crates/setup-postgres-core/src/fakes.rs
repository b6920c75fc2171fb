//! In-memory fakes for the runner trait (testing only)
//!
//! `RecordingRunner` records every command and download and answers from a
//! list of scripted responders. [`RecordingRunner::simulating_postgres`]
//! adds responders that behave enough like the PostgreSQL tools for the
//! pipeline to run end to end without a server.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::Result;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

/// Body returned for every download.
pub const FAKE_SIGNING_KEY: &[u8] =
    b"-----BEGIN PGP PUBLIC KEY BLOCK-----\nfake\n-----END PGP PUBLIC KEY BLOCK-----\n";

/// What a scripted command returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl FakeResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

type Responder = Box<dyn Fn(&CommandSpec) -> Option<FakeResponse> + Send + Sync>;

/// Runner that records calls and answers from scripted responders.
///
/// Responders are consulted in registration order; the first `Some` wins.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<CommandSpec>>,
    downloads: Mutex<Vec<String>>,
    responders: Vec<Responder>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every invocation of `tool` whose arguments include `arg`.
    pub fn respond(self, tool: &str, arg: &str, response: FakeResponse) -> Self {
        let tool = tool.to_string();
        let arg = arg.to_string();
        self.with_responder(move |spec| {
            (spec.tool_name() == tool && spec.args.iter().any(|a| a == &arg))
                .then(|| response.clone())
        })
    }

    /// Register an arbitrary responder.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&CommandSpec) -> Option<FakeResponse> + Send + Sync + 'static,
    {
        self.responders.push(Box::new(responder));
        self
    }

    /// Responders for `pg_config`, `brew --prefix`, `id -u`, `initdb` and
    /// `createdb`.
    ///
    /// `initdb` creates the data directory with a stock `postgresql.conf`;
    /// `createdb` tracks database names and fails on a duplicate the way the
    /// real tool does.
    pub fn simulating_postgres() -> Self {
        let databases: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(
            ["postgres", "template0", "template1"]
                .into_iter()
                .map(String::from)
                .collect(),
        ));

        Self::new()
            .with_responder(|spec| {
                if spec.tool_name() != "pg_config" {
                    return None;
                }
                let bin_dir = spec
                    .program
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("/usr/local/pgsql/bin"));
                let answer = if spec.args.iter().any(|a| a == "--libdir") {
                    bin_dir.with_file_name("lib")
                } else {
                    bin_dir
                };
                Some(FakeResponse::ok(format!("{}\n", answer.display())))
            })
            .respond("brew", "--prefix", FakeResponse::ok("/opt/homebrew\n"))
            .respond("id", "-u", FakeResponse::ok("1001\n"))
            .with_responder(|spec| {
                if spec.tool_name() != "initdb" {
                    return None;
                }
                let Some(pgdata) = spec.flag_value("--pgdata") else {
                    return Some(FakeResponse::fail(1, "initdb: error: no data directory specified"));
                };
                Some(match write_stock_cluster(Path::new(pgdata)) {
                    Ok(()) => FakeResponse::ok("Success.\n"),
                    Err(e) => FakeResponse::fail(1, format!("initdb: error: {e}")),
                })
            })
            .with_responder(move |spec| {
                if spec.tool_name() != "createdb" {
                    return None;
                }
                let name = spec.args.last()?.clone();
                let mut databases = databases.lock().unwrap();
                if databases.insert(name.clone()) {
                    Some(FakeResponse::ok(""))
                } else {
                    Some(FakeResponse::fail(
                        1,
                        format!(
                            "createdb: error: database creation failed: ERROR:  database \"{name}\" already exists"
                        ),
                    ))
                }
            })
    }

    /// Every command run so far.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands whose program stem is `tool`.
    pub fn invocations_of(&self, tool: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.tool_name() == tool)
            .collect()
    }

    /// URLs downloaded so far.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        let response = self
            .responders
            .iter()
            .find_map(|r| r(spec))
            .unwrap_or_else(|| FakeResponse::ok(""));

        Ok(CommandOutput {
            command: spec.to_string(),
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            duration_ms: 0,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.downloads.lock().unwrap().push(url.to_string());
        Ok(FAKE_SIGNING_KEY.to_vec())
    }
}

/// Mimic the parts of an `initdb` result the bootstrapper touches.
fn write_stock_cluster(pgdata: &Path) -> std::io::Result<()> {
    if pgdata.exists() && pgdata.read_dir()?.next().is_some() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("directory \"{}\" exists but is not empty", pgdata.display()),
        ));
    }
    std::fs::create_dir_all(pgdata)?;
    std::fs::write(pgdata.join("PG_VERSION"), "15\n")?;
    std::fs::write(
        pgdata.join("postgresql.conf"),
        "# PostgreSQL configuration file\n\
         #listen_addresses = 'localhost'\n\
         #port = 5432\n\
         max_connections = 100\n\
         #unix_socket_directories = '/var/run/postgresql'\n",
    )
}
