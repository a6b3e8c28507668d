//! Provisioning steps.
//!
//! A step is a plain record: a name, a reboot policy, an optional guard and
//! an action. Steps hold no state between invocations; all progress lives in
//! the checkpoint.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capability::{Capability, CapabilityInspector};
use crate::host::{Host, HostError};

/// When completing a step should trigger a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootPolicy {
    /// Only restart if the host itself reports a pending restart.
    #[default]
    Never,
    /// Restart when the step changed something.
    IfChanged,
    /// Restart after the step regardless of outcome.
    Always,
}

impl RebootPolicy {
    /// Whether this policy alone demands a restart after `outcome`.
    #[must_use]
    pub fn requires_restart(self, outcome: &StepOutcome) -> bool {
        match self {
            Self::Never => false,
            Self::IfChanged => matches!(outcome, StepOutcome::Success),
            Self::Always => !outcome.is_failed(),
        }
    }
}

impl std::fmt::Display for RebootPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::IfChanged => write!(f, "if_changed"),
            Self::Always => write!(f, "always"),
        }
    }
}

/// Result of executing a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step changed the host.
    Success,
    /// Nothing to do; the host already satisfied the step.
    Skipped,
    /// The action failed.
    Failed(String),
}

impl StepOutcome {
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// The side effect a step performs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Enable an optional OS feature.
    EnableFeature { name: String },
    /// Install a package with the host package manager.
    InstallPackage { id: String },
    /// Download an installer payload.
    Download { url: String, dest: PathBuf },
    /// Run a downloaded installer.
    RunInstaller {
        path: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Run an arbitrary command.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Apply one pass of host software updates. Repeats across restarts until
    /// the host reports no pending restart.
    EnsureUpdated,
}

impl Action {
    /// Perform the action. Returns whether anything changed.
    async fn perform<H: Host + ?Sized>(&self, host: &H) -> Result<bool, HostError> {
        match self {
            Self::EnableFeature { name } => host.enable_feature(name).await.map(|()| true),
            Self::InstallPackage { id } => host.install_package(id).await.map(|()| true),
            Self::Download { url, dest } => host.fetch(url, dest).await.map(|()| true),
            Self::RunInstaller { path, args } => {
                host.run_installer(path, args).await.map(|()| true)
            }
            Self::Command { program, args } => host.run_command(program, args).await.map(|()| true),
            Self::EnsureUpdated => {
                let applied = host.apply_updates().await?;
                info!(applied, "Applied update batch");
                Ok(applied > 0)
            }
        }
    }
}

/// A named, idempotent unit of provisioning work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Unique identifier within the plan.
    pub name: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Restart behaviour after this step.
    #[serde(default)]
    pub reboot: RebootPolicy,
    /// Condition that, when already true, makes the step a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Capability>,
    /// What the step does.
    pub action: Action,
}

impl Step {
    /// Create a step with no guard and the default reboot policy.
    #[must_use]
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            description: None,
            reboot: RebootPolicy::default(),
            guard: None,
            action,
        }
    }

    /// Set the reboot policy.
    #[must_use]
    pub fn with_reboot(mut self, policy: RebootPolicy) -> Self {
        self.reboot = policy;
        self
    }

    /// Set the idempotency guard.
    #[must_use]
    pub fn with_guard(mut self, guard: Capability) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Text shown in progress output.
    #[must_use]
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }

    /// Whether this step repeats across restarts until the host settles.
    #[must_use]
    pub fn repeats_until_settled(&self) -> bool {
        matches!(self.action, Action::EnsureUpdated)
    }

    /// Run the step against a host.
    pub async fn execute<H: Host + ?Sized>(&self, host: &H) -> StepOutcome {
        if let Some(guard) = &self.guard {
            if CapabilityInspector::new(host).is_satisfied(guard) {
                info!(step = %self.name, guard = %guard, "Already satisfied, skipping");
                return StepOutcome::Skipped;
            }
        }

        match self.action.perform(host).await {
            Ok(true) => StepOutcome::Success,
            Ok(false) => StepOutcome::Skipped,
            Err(e) => {
                warn!(step = %self.name, error = %e, "Step action failed");
                StepOutcome::Failed(e.to_string())
            }
        }
    }
}
