//! setup-postgres - PostgreSQL for CI runners
//!
//! Installs a PostgreSQL major version, initializes and starts a cluster,
//! writes a connection service file and publishes the connection URI.
//!
//! ## Commands
//!
//! - `run` (default): provision the server on this runner
//! - `plan`: print the commands `run` would execute, as JSON
//! - `uri`: print the connection URI the inputs produce

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use setup_postgres_core::config::{
    DEFAULT_DATABASE, DEFAULT_MAJOR_VERSION, DEFAULT_PASSWORD, DEFAULT_PORT, DEFAULT_USERNAME,
};
use setup_postgres_core::{
    connection_uri, createdb_command, installer_for, ActionsChannel, ClusterBootstrapper,
    DryRunRunner, ExistingInstall, Platform, PlatformInstaller, ProvisioningConfig, SetupPipeline,
    SystemRunner,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "setup-postgres")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Install and start PostgreSQL on a CI runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    inputs: Inputs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Action inputs. Each one falls back to the `INPUT_*` variable the
/// Actions runner sets for a step's `with:` block.
#[derive(clap::Args, Debug)]
struct Inputs {
    /// Superuser name; also the service name
    #[arg(long, global = true, env = "INPUT_USERNAME", default_value = DEFAULT_USERNAME)]
    username: String,

    /// Superuser password
    #[arg(
        long,
        global = true,
        env = "INPUT_PASSWORD",
        hide_env_values = true,
        hide_default_value = true,
        default_value = DEFAULT_PASSWORD
    )]
    password: String,

    /// Database to create (`postgres` keeps the default one)
    #[arg(long, global = true, env = "INPUT_DATABASE", default_value = DEFAULT_DATABASE)]
    database: String,

    /// Server port
    #[arg(long, global = true, env = "INPUT_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// PostgreSQL major version
    #[arg(
        long,
        global = true,
        env = "INPUT_POSTGRES-VERSION",
        default_value = DEFAULT_MAJOR_VERSION
    )]
    postgres_version: String,

    /// Scratch directory for the cluster, service file and server log
    /// (default: the system temp directory)
    #[arg(long, global = true, env = "RUNNER_TEMP")]
    work_dir: Option<PathBuf>,
}

impl Inputs {
    fn into_config(self) -> ProvisioningConfig {
        ProvisioningConfig {
            username: self.username,
            password: self.password,
            database: self.database,
            port: self.port,
            major_version: self.postgres_version,
            work_dir: self.work_dir.unwrap_or_else(std::env::temp_dir),
        }
    }
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Provision PostgreSQL on this runner
    Run {
        /// Use binaries already in this directory instead of installing
        #[arg(long)]
        bin_dir: Option<PathBuf>,

        /// Write a JSON summary of the run (password masked)
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the commands a run would execute, without running them
    Plan {
        /// Target platform (default: this host)
        #[arg(long)]
        platform: Option<Platform>,
    },

    /// Print the connection URI for the given inputs
    Uri,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    setup_postgres_core::init_tracing(cli.json, level);

    let config = cli.inputs.into_config();
    let command = cli.command.unwrap_or(Commands::Run {
        bin_dir: None,
        report: None,
    });

    match command {
        Commands::Run { bin_dir, report } => {
            cmd_run(&config, bin_dir.as_deref(), report.as_deref()).await
        }
        Commands::Plan { platform } => cmd_plan(&config, platform).await,
        Commands::Uri => cmd_uri(&config),
    }
}

fn installer(platform: Platform, bin_dir: Option<&Path>) -> Box<dyn PlatformInstaller> {
    match bin_dir {
        Some(dir) => Box::new(ExistingInstall::new(platform, dir)),
        None => installer_for(platform),
    }
}

async fn cmd_run(
    config: &ProvisioningConfig,
    bin_dir: Option<&Path>,
    report: Option<&Path>,
) -> Result<()> {
    let platform = Platform::detect()?;
    let installer = installer(platform, bin_dir);
    let channel = ActionsChannel::from_env();

    let outcome = SetupPipeline::run(&SystemRunner::new(), installer.as_ref(), &channel, config)
        .await
        .context("PostgreSQL setup failed")?;

    if let Some(path) = report {
        let body = serde_json::to_string_pretty(&outcome.report(config))?;
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(report = %path.display(), "Report written");
    }

    Ok(())
}

/// Render every command a run on `platform` would execute, in order.
async fn plan_commands(config: &ProvisioningConfig, platform: Platform) -> Result<Vec<String>> {
    config.validate()?;

    let runner = DryRunRunner::new();
    let layout = installer_for(platform)
        .install(&config.major_version, &runner)
        .await?;

    let mut commands = runner.steps();
    let bootstrapper = ClusterBootstrapper::new(config, &layout);
    commands.push(
        bootstrapper
            .initdb_command(Path::new("<password-file>"))
            .to_string(),
    );
    commands.push(bootstrapper.start_command().to_string());
    if !config.uses_default_database() {
        commands.push(createdb_command(config, &layout, &config.service_file()).to_string());
    }
    Ok(commands)
}

async fn cmd_plan(config: &ProvisioningConfig, platform: Option<Platform>) -> Result<()> {
    let platform = match platform {
        Some(platform) => platform,
        None => Platform::detect()?,
    };
    let commands = plan_commands(config, platform).await?;

    let plan = json!({
        "platform": platform,
        "major_version": config.major_version,
        "data_dir": config.cluster_dir(),
        "service_file": config.service_file(),
        "commands": commands,
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_uri(config: &ProvisioningConfig) -> Result<()> {
    config.validate()?;
    println!("{}", connection_uri(config));
    Ok(())
}
