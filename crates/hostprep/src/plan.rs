//! Step plans.
//!
//! A plan is the fixed, ordered step sequence for one host family. The
//! order is part of the checkpoint contract: the checkpoint stores an index
//! into it.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::capability::Capability;
use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use crate::os::OsFamily;
use crate::step::{Action, RebootPolicy, Step};

/// Windows optional feature providing the Linux compatibility subsystem.
pub const LINUX_SUBSYSTEM_FEATURE: &str = "Microsoft-Windows-Subsystem-Linux";

/// Windows optional feature required by the subsystem's virtual machine mode.
pub const VM_PLATFORM_FEATURE: &str = "VirtualMachinePlatform";

/// Default container runtime installer for Windows hosts.
pub const DEFAULT_CONTAINER_RUNTIME_URL: &str =
    "https://desktop.docker.com/win/main/amd64/Docker%20Desktop%20Installer.exe";

/// Validated, ordered step sequence.
#[derive(Debug, Clone)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Build a plan, checking that it is non-empty and names are unique.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidPlan`] for an empty plan, an empty
    /// name or a duplicate name.
    pub fn new(steps: Vec<Step>) -> Result<Self, ProvisionError> {
        if steps.is_empty() {
            return Err(ProvisionError::InvalidPlan("plan has no steps".into()));
        }

        let mut seen = HashSet::new();
        for (index, step) in steps.iter().enumerate() {
            if step.name.trim().is_empty() {
                return Err(ProvisionError::InvalidPlan(format!(
                    "step #{index} has an empty name"
                )));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ProvisionError::InvalidPlan(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        Ok(Self { steps })
    }

    /// The plan configured for `os`: the config's explicit steps when given,
    /// otherwise the built-in plan for that family.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting plan is invalid.
    pub fn resolve(os: OsFamily, config: &ProvisionConfig) -> Result<Self, ProvisionError> {
        match &config.steps {
            Some(steps) => Self::new(steps.clone()),
            None => Self::new(default_steps(os, config)),
        }
    }

    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

fn ensure_updated() -> Step {
    Step::new("ensure-updated", Action::EnsureUpdated)
        .with_description("Bring host software up to date")
}

fn package_step(name: &str, description: &str, package: &str) -> Step {
    Step::new(
        name,
        Action::InstallPackage {
            id: package.to_string(),
        },
    )
    .with_description(description)
    .with_guard(Capability::Package {
        id: package.to_string(),
    })
}

/// Built-in step sequence for a host family.
#[must_use]
pub fn default_steps(os: OsFamily, config: &ProvisionConfig) -> Vec<Step> {
    match os {
        OsFamily::Windows => windows_steps(config),
        OsFamily::MacOs => vec![
            ensure_updated(),
            Step::new(
                "install-container-runtime",
                Action::Command {
                    program: "brew".into(),
                    args: vec!["install".into(), "--cask".into(), "docker".into()],
                },
            )
            .with_description("Install container runtime")
            .with_guard(Capability::Package { id: "docker".into() }),
            Step::new(
                "enable-remote-management",
                Action::Command {
                    program: "systemsetup".into(),
                    args: vec!["-setremotelogin".into(), "on".into()],
                },
            )
            .with_description("Enable remote login")
            .with_guard(Capability::Service {
                name: "com.openssh.sshd".into(),
            }),
        ],
        OsFamily::Debian | OsFamily::Ubuntu => vec![
            ensure_updated(),
            package_step(
                "install-container-runtime",
                "Install container runtime",
                "docker.io",
            ),
            package_step(
                "enable-remote-management",
                "Install OpenSSH server",
                "openssh-server",
            ),
        ],
        OsFamily::Fedora | OsFamily::CentOs => vec![
            ensure_updated(),
            package_step(
                "install-container-runtime",
                "Install container runtime",
                "podman",
            ),
            package_step(
                "enable-remote-management",
                "Install OpenSSH server",
                "openssh-server",
            ),
        ],
        OsFamily::ArchLinux => vec![
            ensure_updated(),
            package_step("install-container-runtime", "Install container runtime", "docker"),
            package_step("enable-remote-management", "Install OpenSSH server", "openssh"),
        ],
    }
}

fn windows_steps(config: &ProvisionConfig) -> Vec<Step> {
    let installer: PathBuf = config.download_dir.join("DockerDesktopInstaller.exe");

    vec![
        Step::new(
            "enable-linux-subsystem",
            Action::EnableFeature {
                name: LINUX_SUBSYSTEM_FEATURE.into(),
            },
        )
        .with_description("Enable Linux subsystem")
        .with_reboot(RebootPolicy::IfChanged)
        .with_guard(Capability::Feature {
            name: LINUX_SUBSYSTEM_FEATURE.into(),
        }),
        Step::new(
            "enable-virtual-machine-platform",
            Action::EnableFeature {
                name: VM_PLATFORM_FEATURE.into(),
            },
        )
        .with_description("Enable virtual machine platform")
        .with_reboot(RebootPolicy::IfChanged)
        .with_guard(Capability::Feature {
            name: VM_PLATFORM_FEATURE.into(),
        }),
        ensure_updated(),
        Step::new(
            "download-container-runtime",
            Action::Download {
                url: config.container_runtime_url.clone(),
                dest: installer.clone(),
            },
        )
        .with_description("Download container runtime installer")
        .with_guard(Capability::File {
            path: installer.clone(),
        }),
        Step::new(
            "install-container-runtime",
            Action::RunInstaller {
                path: installer,
                args: vec!["install".into(), "--quiet".into(), "--accept-license".into()],
            },
        )
        .with_description("Install container runtime")
        .with_reboot(RebootPolicy::IfChanged)
        .with_guard(Capability::Package {
            id: "Docker.DockerDesktop".into(),
        }),
        Step::new(
            "enable-remote-management",
            Action::Command {
                program: "powershell".into(),
                args: vec![
                    "-NoProfile".into(),
                    "-Command".into(),
                    "Enable-PSRemoting -Force -SkipNetworkProfileCheck".into(),
                ],
            },
        )
        .with_description("Enable remote management endpoint")
        .with_guard(Capability::Service {
            name: "WinRM".into(),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_duplicate_plans() {
        assert!(matches!(
            Plan::new(vec![]),
            Err(ProvisionError::InvalidPlan(_))
        ));

        let dup = vec![
            Step::new("a", Action::EnsureUpdated),
            Step::new("a", Action::EnsureUpdated),
        ];
        let err = Plan::new(dup).unwrap_err();
        assert!(err.to_string().contains("duplicate step name 'a'"));

        let blank = vec![Step::new("  ", Action::EnsureUpdated)];
        assert!(Plan::new(blank).is_err());
    }

    #[test]
    fn test_every_family_has_a_valid_plan_with_one_update_step() {
        let config = ProvisionConfig::default();
        for os in OsFamily::ALL {
            let plan = Plan::resolve(os, &config).unwrap();
            let updates = plan
                .steps()
                .iter()
                .filter(|s| s.repeats_until_settled())
                .count();
            assert_eq!(updates, 1, "{os} should have exactly one update step");
            assert!(plan
                .steps()
                .iter()
                .any(|s| s.name == "install-container-runtime"));
            assert!(plan
                .steps()
                .iter()
                .any(|s| s.name == "enable-remote-management"));
        }
    }

    #[test]
    fn test_windows_plan_starts_with_linux_subsystem() {
        let config = ProvisionConfig::default();
        let plan = Plan::resolve(OsFamily::Windows, &config).unwrap();
        let first = &plan.steps()[0];
        assert_eq!(first.name, "enable-linux-subsystem");
        assert_eq!(first.reboot, RebootPolicy::IfChanged);
        assert_eq!(
            first.guard,
            Some(Capability::Feature {
                name: LINUX_SUBSYSTEM_FEATURE.into()
            })
        );
    }

    #[test]
    fn test_download_and_install_share_installer_path() {
        let mut config = ProvisionConfig::default();
        config.download_dir = PathBuf::from("/var/cache/hostprep");
        let plan = Plan::resolve(OsFamily::Windows, &config).unwrap();

        let download = plan
            .steps()
            .iter()
            .find(|s| s.name == "download-container-runtime")
            .unwrap();
        let install = plan
            .steps()
            .iter()
            .find(|s| s.name == "install-container-runtime")
            .unwrap();

        let Action::Download { dest, .. } = &download.action else {
            panic!("expected download action");
        };
        let Action::RunInstaller { path, .. } = &install.action else {
            panic!("expected installer action");
        };
        assert_eq!(dest, path);
        assert!(dest.starts_with("/var/cache/hostprep"));
    }

    #[test]
    fn test_configured_steps_override_defaults() {
        let mut config = ProvisionConfig::default();
        config.steps = Some(vec![Step::new(
            "install-git",
            Action::InstallPackage { id: "git".into() },
        )]);
        let plan = Plan::resolve(OsFamily::Debian, &config).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps()[0].name, "install-git");
    }
}
