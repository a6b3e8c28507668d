//! Reset command - forget provisioning progress.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Confirm};
use tracing::info;

use crate::checkpoint::{CheckpointStore, FileCheckpointStore};
use crate::ui;

/// Delete the checkpoint so the next run starts from the first step.
#[derive(Args, Debug)]
pub struct ResetCommand {
    /// Checkpoint file location.
    #[arg(long, value_name = "FILE", env = "HOSTPREP_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,
}

impl ResetCommand {
    /// # Errors
    ///
    /// Returns an error if the prompt fails or the checkpoint cannot be removed.
    pub fn run(&self, config_path: Option<&Path>) -> Result<()> {
        let config = super::load_config(config_path, self.checkpoint.as_ref())?;
        let store = FileCheckpointStore::new(&config.checkpoint_path);

        if !self.yes {
            let proceed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Delete provisioning progress at {}?", store.location()))
                .default(false)
                .interact()?;

            if !proceed {
                println!("{}", "Reset cancelled.".yellow());
                return Ok(());
            }
        }

        if store.clear()? {
            info!(location = %store.location(), "Checkpoint removed");
            ui::print_success("Provisioning progress cleared");
        } else {
            ui::print_info("No checkpoint to remove");
        }
        Ok(())
    }
}
