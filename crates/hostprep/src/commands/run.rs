//! Run command - provision the host, resuming from the checkpoint.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::checkpoint::FileCheckpointStore;
use crate::config::ProvisionConfig;
use crate::host::SystemHost;
use crate::lock::InstanceLock;
use crate::os::OsFamily;
use crate::plan::Plan;
use crate::ui;
use crate::workflow::{RunOutcome, RunnerSettings, WorkflowRunner};

/// Provision the host, resuming where the last run stopped.
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Operating system to provision (detected when omitted).
    #[arg(long, value_name = "OS", env = "HOSTPREP_OS")]
    pub os: Option<OsFamily>,

    /// Checkpoint file location.
    #[arg(long, value_name = "FILE", env = "HOSTPREP_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// Update passes allowed before the update step gives up.
    #[arg(long, value_name = "N")]
    pub max_update_passes: Option<u32>,

    /// Stop at a restart decision instead of restarting.
    #[arg(long)]
    pub no_restart: bool,

    /// Never prompt.
    #[arg(short, long)]
    pub yes: bool,
}

impl RunCommand {
    /// Run the provisioning workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid, another instance is
    /// running, or the workflow fails.
    pub async fn run(&self, config_path: Option<&Path>) -> Result<()> {
        ui::print_banner();

        let mut config = super::load_config(config_path, self.checkpoint.as_ref())?;
        if let Some(passes) = self.max_update_passes {
            config.max_update_passes = passes;
        }
        config.validate()?;

        let os = super::resolve_os(self.os, &config, !self.yes)?;
        let plan = Plan::resolve(os, &config)?;
        let _lock = InstanceLock::acquire(&config.lock_path())?;

        ui::print_kv("Operating system", os.token());
        ui::print_kv("Checkpoint", &config.checkpoint_path.display().to_string());
        ui::print_kv("Steps", &plan.len().to_string());
        info!(os = %os, steps = plan.len(), "Starting provisioning");

        let host = SystemHost::new(os)?
            .with_restart_delay(config.restart_delay_secs)
            .with_resume_command(resume_command(os, &config, config_path)?);
        let store = FileCheckpointStore::new(&config.checkpoint_path);
        let settings = RunnerSettings {
            max_update_passes: config.max_update_passes,
            consult_management_agent: config.consult_management_agent,
            register_resume: config.register_resume,
            skip_restart: self.no_restart,
        };

        ui::print_section("Provisioning");
        let mut runner = WorkflowRunner::new(plan, &host, store, settings);
        let outcome = runner.run().await?;
        match &outcome {
            RunOutcome::Completed { executed } => {
                println!();
                ui::print_success(&format!(
                    "Provisioning complete ({} of {} executed steps changed the host)",
                    outcome.changes(),
                    executed.len()
                ));
            }
            RunOutcome::AwaitingReboot { resume_at, .. } => {
                ui::print_info(&format!(
                    "Provisioning resumes at step {} after the restart",
                    resume_at + 1
                ));
            }
        }
        Ok(())
    }
}

/// Command line the resume hook runs after a restart.
fn resume_command(
    os: OsFamily,
    config: &ProvisionConfig,
    config_path: Option<&Path>,
) -> Result<Vec<String>> {
    let exe = std::env::current_exe()?;
    let mut command = vec![exe.display().to_string()];
    if let Some(path) = config_path {
        command.push("--config".into());
        command.push(path.display().to_string());
    }
    command.extend([
        "run".to_string(),
        "--yes".into(),
        "--os".into(),
        os.token().into(),
        "--checkpoint".into(),
        config.checkpoint_path.display().to_string(),
    ]);
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_command_pins_os_and_checkpoint() {
        let config = ProvisionConfig {
            checkpoint_path: PathBuf::from("/var/lib/hostprep/checkpoint.json"),
            ..ProvisionConfig::default()
        };
        let command = resume_command(
            OsFamily::Ubuntu,
            &config,
            Some(Path::new("/etc/hostprep.toml")),
        )
        .unwrap();

        assert_eq!(&command[1..3], ["--config", "/etc/hostprep.toml"]);
        let rest = &command[3..];
        assert_eq!(
            rest,
            [
                "run",
                "--yes",
                "--os",
                "ubuntu",
                "--checkpoint",
                "/var/lib/hostprep/checkpoint.json"
            ]
        );
    }
}
