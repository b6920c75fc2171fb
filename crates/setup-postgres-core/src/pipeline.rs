//! Provisioning pipeline orchestration.

use crate::actions::ActionsChannel;
use crate::bootstrap::{ClusterBootstrapper, ClusterDirectory};
use crate::config::ProvisioningConfig;
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::install::{InstallLayout, PlatformInstaller};
use crate::provision::{provision_database, ProvisionOutcome};
use crate::report::SetupOutputs;
use crate::service::ServiceDefinition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Install,
    Bootstrap,
    Register,
    Provision,
    Report,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Install => "install",
            Stage::Bootstrap => "bootstrap",
            Stage::Register => "register",
            Stage::Provision => "provision",
            Stage::Report => "report",
        }
    }
}

/// Timing of one completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub run_id: String,
    pub outputs: SetupOutputs,
    pub layout: InstallLayout,
    pub cluster: ClusterDirectory,
    pub service_file: PathBuf,
    pub provision: ProvisionOutcome,
    pub stages: Vec<StageRecord>,
    pub duration_ms: u64,
}

impl PipelineOutcome {
    /// JSON summary for `--report`. The password is masked.
    pub fn report(&self, config: &ProvisioningConfig) -> serde_json::Value {
        json!({
            "run_id": self.run_id,
            "outputs": self.outputs.redacted(&config.password),
            "bin_dir": self.layout.bin_dir,
            "lib_dir": self.layout.lib_dir,
            "data_dir": self.cluster.data_dir,
            "log_file": self.cluster.log_file,
            "service_file": self.service_file,
            "database": config.database,
            "provision": self.provision,
            "stages": self.stages,
            "duration_ms": self.duration_ms,
        })
    }
}

/// Records stage timings as the pipeline advances.
struct StageClock {
    records: Vec<StageRecord>,
}

impl StageClock {
    fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    fn begin(&self, stage: Stage) -> (Stage, DateTime<Utc>, Instant) {
        info!(stage = stage.name(), "Stage started");
        (stage, Utc::now(), Instant::now())
    }

    fn finish(&mut self, (stage, started_at, start): (Stage, DateTime<Utc>, Instant)) {
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(stage = stage.name(), duration_ms, "Stage finished");
        self.records.push(StageRecord {
            stage,
            started_at,
            duration_ms,
        });
    }
}

/// Installer -> Bootstrapper -> Registrar -> Provisioner -> Reporter.
pub struct SetupPipeline;

impl SetupPipeline {
    /// Run every stage in order. The first failure aborts the run; nothing
    /// is published to the actions channel unless every stage succeeded.
    pub async fn run(
        runner: &dyn CommandRunner,
        installer: &dyn PlatformInstaller,
        channel: &ActionsChannel,
        config: &ProvisioningConfig,
    ) -> Result<PipelineOutcome> {
        config.validate()?;

        let run_id = Uuid::new_v4().to_string();
        info!(
            run_id = %run_id,
            platform = %installer.platform(),
            major_version = %config.major_version,
            "Starting PostgreSQL setup"
        );

        let result = Self::run_stages(run_id.clone(), runner, installer, channel, config).await;
        match &result {
            Ok(outcome) => {
                info!(run_id = %run_id, duration_ms = outcome.duration_ms, "PostgreSQL setup completed")
            }
            Err(e) => error!(run_id = %run_id, error = %e, "PostgreSQL setup failed"),
        }
        result
    }

    async fn run_stages(
        run_id: String,
        runner: &dyn CommandRunner,
        installer: &dyn PlatformInstaller,
        channel: &ActionsChannel,
        config: &ProvisioningConfig,
    ) -> Result<PipelineOutcome> {
        let start = Instant::now();
        let mut clock = StageClock::new();

        let stage = clock.begin(Stage::Install);
        let layout = installer.install(&config.major_version, runner).await?;
        clock.finish(stage);

        let stage = clock.begin(Stage::Bootstrap);
        let cluster = ClusterBootstrapper::new(config, &layout)
            .bootstrap(runner)
            .await?;
        clock.finish(stage);

        let stage = clock.begin(Stage::Register);
        let service_file = config.service_file();
        ServiceDefinition::from_config(config).write(&service_file)?;
        clock.finish(stage);

        let stage = clock.begin(Stage::Provision);
        let provision = provision_database(runner, config, &layout, &service_file).await?;
        clock.finish(stage);

        let stage = clock.begin(Stage::Report);
        let outputs = SetupOutputs::from_config(config);
        channel.publish(&outputs, &layout, &service_file)?;
        clock.finish(stage);

        Ok(PipelineOutcome {
            run_id,
            outputs,
            layout,
            cluster,
            service_file,
            provision,
            stages: clock.records,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        let names: Vec<&str> = [
            Stage::Install,
            Stage::Bootstrap,
            Stage::Register,
            Stage::Provision,
            Stage::Report,
        ]
        .iter()
        .map(Stage::name)
        .collect();
        assert_eq!(
            names,
            vec!["install", "bootstrap", "register", "provision", "report"]
        );
    }

    #[test]
    fn test_clock_records_in_order() {
        let mut clock = StageClock::new();
        let stage = clock.begin(Stage::Install);
        clock.finish(stage);
        let stage = clock.begin(Stage::Bootstrap);
        clock.finish(stage);

        let stages: Vec<Stage> = clock.records.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![Stage::Install, Stage::Bootstrap]);
    }
}
