//! Probe command - report each reboot signal.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::host::SystemHost;
use crate::os::OsFamily;
use crate::reboot::RebootProbe;
use crate::ui;

/// Check whether the host is waiting for a restart.
#[derive(Args, Debug)]
pub struct ProbeCommand {
    /// Operating system to probe as (detected when omitted).
    #[arg(long, value_name = "OS", env = "HOSTPREP_OS")]
    os: Option<OsFamily>,

    /// Skip the management agent query.
    #[arg(long)]
    no_agent: bool,
}

impl ProbeCommand {
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or the OS is unknown.
    pub fn run(&self, config_path: Option<&Path>) -> Result<()> {
        let config = super::load_config(config_path, None)?;
        let os = super::resolve_os(self.os, &config, false)?;
        let host = SystemHost::new(os)?;
        let probe = RebootProbe::new(&host)
            .with_management_agent(config.consult_management_agent && !self.no_agent);

        ui::print_section(&format!("Reboot signals ({os})"));
        let mut pending = false;
        for reading in probe.signals() {
            pending |= reading.pending;
            let state = match (&reading.error, reading.pending) {
                (Some(e), _) => format!("{} ({e})", "unavailable".bright_black()),
                (None, true) => "pending".yellow().to_string(),
                (None, false) => "clear".green().to_string(),
            };
            println!("  {:<40} {state}", reading.signal);
        }

        println!();
        if pending {
            ui::print_warning("A restart is pending");
        } else {
            ui::print_success("No restart pending");
        }
        Ok(())
    }
}
