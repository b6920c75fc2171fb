//! setup-postgres core library
//!
//! Provisions a PostgreSQL server on a CI runner:
//! - installs a major version with the platform's package manager
//! - initializes a cluster (SCRAM-SHA-256 superuser, UTF-8, `en_US.UTF-8`)
//!   and starts it on the requested port with unix sockets disabled
//! - writes a libpq connection service file named after the superuser
//! - creates the requested database unless it is `postgres`
//! - publishes `connection-uri` and `service-name` as step outputs
//!
//! Stages run strictly in order through [`SetupPipeline`]; the first error
//! aborts the run.

pub mod actions;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod install;
pub mod pipeline;
pub mod provision;
pub mod report;
pub mod service;
pub mod telemetry;

// Re-export key types
pub use actions::ActionsChannel;
pub use bootstrap::{ClusterBootstrapper, ClusterDirectory};
pub use config::ProvisioningConfig;
pub use error::{Result, SetupError};
pub use exec::{CommandOutput, CommandRunner, CommandSpec, DryRunRunner, SystemRunner};
pub use install::{installer_for, ExistingInstall, InstallLayout, Platform, PlatformInstaller};
pub use pipeline::{PipelineOutcome, SetupPipeline, Stage, StageRecord};
pub use provision::{createdb_command, provision_database, ProvisionOutcome};
pub use report::{connection_uri, SetupOutputs};
pub use service::ServiceDefinition;
pub use telemetry::init_tracing;
