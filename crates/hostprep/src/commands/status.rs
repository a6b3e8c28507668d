//! Status command - show checkpoint progress against the plan.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::os::OsFamily;
use crate::plan::Plan;
use crate::ui::{self, PlanMarker};

/// Show provisioning progress.
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Operating system whose plan to compare against (detected when omitted).
    #[arg(long, value_name = "OS", env = "HOSTPREP_OS")]
    os: Option<OsFamily>,

    /// Checkpoint file location.
    #[arg(long, value_name = "FILE", env = "HOSTPREP_CHECKPOINT")]
    checkpoint: Option<PathBuf>,
}

impl StatusCommand {
    /// # Errors
    ///
    /// Returns an error if configuration or the checkpoint cannot be read.
    pub fn run(&self, config_path: Option<&Path>) -> Result<()> {
        let config = super::load_config(config_path, self.checkpoint.as_ref())?;
        let store = FileCheckpointStore::new(&config.checkpoint_path);

        ui::print_section("Provisioning status");
        ui::print_kv("Checkpoint", &store.location());

        let Some(checkpoint) = store.load()? else {
            ui::print_info("No provisioning run has started on this machine");
            return Ok(());
        };

        ui::print_kv("Next step", &(checkpoint.next_step_index + 1).to_string());
        ui::print_kv("Update passes", &checkpoint.update_retry_count.to_string());
        if let Some(updated) = &checkpoint.updated_at {
            ui::print_kv("Last written", updated);
        }
        if let Some(error) = &checkpoint.last_error {
            ui::print_error(&format!("Last run failed: {error}"));
        }

        let os = match super::resolve_os(self.os, &config, false) {
            Ok(os) => os,
            Err(e) => {
                ui::print_warning(&format!("Cannot show plan: {e}"));
                return Ok(());
            }
        };
        let plan = Plan::resolve(os, &config)?;

        println!();
        for (index, step) in plan.steps().iter().enumerate() {
            let detail = super::plan::describe(step);
            ui::print_plan_entry(index, step.label(), &detail, marker(index, checkpoint.next_step_index));
        }

        println!();
        if checkpoint.is_complete(plan.len()) {
            ui::print_success("Provisioning complete");
        } else {
            ui::print_info(&format!(
                "{} of {} steps remaining",
                plan.len() - checkpoint.next_step_index,
                plan.len()
            ));
        }
        Ok(())
    }
}

fn marker(index: usize, next: usize) -> PlanMarker {
    match index.cmp(&next) {
        std::cmp::Ordering::Less => PlanMarker::Done,
        std::cmp::Ordering::Equal => PlanMarker::Next,
        std::cmp::Ordering::Greater => PlanMarker::Pending,
    }
}
