//! Plan command - show the step sequence for an operating system.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use crate::os::OsFamily;
use crate::plan::Plan;
use crate::step::{Action, Step};
use crate::ui::{self, PlanMarker};

/// Show the provisioning steps for an operating system.
#[derive(Args, Debug)]
pub struct PlanCommand {
    /// Operating system whose plan to show (detected when omitted).
    #[arg(long, value_name = "OS", env = "HOSTPREP_OS")]
    os: Option<OsFamily>,

    /// Output the plan as JSON.
    #[arg(long)]
    json: bool,
}

impl PlanCommand {
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or the plan is invalid.
    pub fn run(&self, config_path: Option<&Path>) -> Result<()> {
        let config = super::load_config(config_path, None)?;
        let os = super::resolve_os(self.os, &config, false)?;
        let plan = Plan::resolve(os, &config)?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(plan.steps())?);
            return Ok(());
        }

        ui::print_section(&format!("Provisioning plan for {os}"));
        for (index, step) in plan.steps().iter().enumerate() {
            ui::print_plan_entry(index, step.label(), &describe(step), PlanMarker::Pending);
        }
        Ok(())
    }
}

/// One-line summary of a step's action, reboot policy and guard.
pub(crate) fn describe(step: &Step) -> String {
    let action = match &step.action {
        Action::EnableFeature { name } => format!("enable feature {name}"),
        Action::InstallPackage { id } => format!("install {id}"),
        Action::Download { url, .. } => format!("download {url}"),
        Action::RunInstaller { path, .. } => format!("run {}", path.display()),
        Action::Command { program, args } => format!("{program} {}", args.join(" ")),
        Action::EnsureUpdated => "apply updates until settled".to_string(),
    };

    let mut detail = format!("{} [reboot: {}", action.trim_end(), step.reboot);
    if let Some(guard) = &step.guard {
        detail.push_str(&format!(", skip if {guard}"));
    }
    detail.push(']');
    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::step::RebootPolicy;

    #[test]
    fn test_describe_step() {
        let step = Step::new(
            "install-container-runtime",
            Action::InstallPackage { id: "podman".into() },
        )
        .with_reboot(RebootPolicy::IfChanged)
        .with_guard(Capability::Package { id: "podman".into() });

        let detail = describe(&step);
        assert!(detail.starts_with("install podman [reboot: if_changed"));
        assert!(detail.contains("skip if"));

        let update = describe(&Step::new("ensure-updated", Action::EnsureUpdated));
        assert_eq!(update, "apply updates until settled [reboot: never]");
    }
}
