//! The real host, driven through the platform's own tooling.
//!
//! Every query and action shells out to the program the host family
//! already ships (`reg`, `dism`, `sc`, `winget`, `apt-get`, `dnf`,
//! `pacman`, `brew`, `systemctl`, `shutdown`). Output parsing lives in
//! small pure functions so it can be tested without the tools.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sysinfo::System;
use tracing::{debug, info};

use super::{
    Actuator, FeatureState, Fetcher, HostError, HostInspect, HttpFetcher, PendingMarker,
    ProgramDetector,
};
use crate::detect::SystemDetector;
use crate::exec::{self, args};
use crate::os::OsFamily;

const CBS_REBOOT_PENDING_KEY: &str =
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\Component Based Servicing\RebootPending";
const WU_REBOOT_REQUIRED_KEY: &str =
    r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\WindowsUpdate\Auto Update\RebootRequired";
const SESSION_MANAGER_KEY: &str = r"HKLM\SYSTEM\CurrentControlSet\Control\Session Manager";
const PENDING_RENAMES_VALUE: &str = "PendingFileRenameOperations";
const RUN_ONCE_KEY: &str = r"HKLM\SOFTWARE\Microsoft\Windows\CurrentVersion\RunOnce";
const RUN_ONCE_VALUE: &str = "hostprep";

const DEBIAN_REBOOT_REQUIRED: &str = "/var/run/reboot-required";
const SYSTEMD_UNIT: &str = "hostprep-resume.service";
const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";

/// `dism` exit code for "succeeded, restart required".
const ERROR_SUCCESS_REBOOT_REQUIRED: i32 = 3010;

const AGENT_QUERY: &str = "(Invoke-CimMethod -Namespace 'root\\ccm\\ClientSDK' \
     -ClassName CCM_ClientUtilities -MethodName DetermineIfRebootPending).RebootPending";
const WINDOWS_UPDATE_SCRIPT: &str = "Import-Module PSWindowsUpdate -ErrorAction Stop; \
     @(Install-WindowsUpdate -AcceptAll -IgnoreReboot -Confirm:$false).Count";

/// Host backed by the running machine.
#[derive(Debug, Clone)]
pub struct SystemHost {
    family: OsFamily,
    detector: SystemDetector,
    fetcher: HttpFetcher,
    restart_delay_secs: u32,
    resume_command: Vec<String>,
}

impl SystemHost {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(family: OsFamily) -> Result<Self, HostError> {
        Ok(Self {
            family,
            detector: SystemDetector::new(family),
            fetcher: HttpFetcher::new()?,
            restart_delay_secs: 5,
            resume_command: Vec::new(),
        })
    }

    /// Grace period handed to the OS restart command.
    #[must_use]
    pub fn with_restart_delay(mut self, secs: u32) -> Self {
        self.restart_delay_secs = secs;
        self
    }

    /// Command line registered as the resume hook: program followed by arguments.
    #[must_use]
    pub fn with_resume_command(mut self, command: Vec<String>) -> Self {
        self.resume_command = command;
        self
    }

    fn unsupported(&self, what: &str) -> HostError {
        HostError::Unsupported(format!("{} ({what})", self.family))
    }

    fn resume_command(&self) -> Result<Vec<String>, HostError> {
        if !self.resume_command.is_empty() {
            return Ok(self.resume_command.clone());
        }
        let exe = std::env::current_exe()?;
        Ok(vec![exe.display().to_string(), "run".into(), "--yes".into()])
    }

    fn windows_marker(marker: PendingMarker) -> Result<bool, HostError> {
        match marker {
            PendingMarker::ComponentServicing => {
                Ok(exec::capture("reg", &["query", CBS_REBOOT_PENDING_KEY])?
                    .status
                    .success())
            }
            PendingMarker::UpdateRebootRequired => {
                Ok(exec::capture("reg", &["query", WU_REBOOT_REQUIRED_KEY])?
                    .status
                    .success())
            }
            PendingMarker::PendingFileRenames => {
                let output = exec::capture(
                    "reg",
                    &["query", SESSION_MANAGER_KEY, "/v", PENDING_RENAMES_VALUE],
                )?;
                Ok(output.status.success()
                    && pending_renames_present(&String::from_utf8_lossy(&output.stdout)))
            }
        }
    }

    fn running_kernel_modules_missing() -> Result<bool, HostError> {
        let release = System::kernel_version().ok_or_else(|| HostError::Parse {
            program: "uname".into(),
            detail: "kernel release unavailable".into(),
        })?;
        Ok(!Path::new("/usr/lib/modules").join(release.trim()).exists())
    }

    fn needs_restarting() -> Result<bool, HostError> {
        let output = exec::capture("needs-restarting", &["-r"])?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            code => Err(HostError::CommandFailed {
                program: "needs-restarting".into(),
                code,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    async fn powershell(script: &str) -> Result<String, HostError> {
        let output = exec::run(
            "powershell",
            &args(&["-NoProfile", "-NonInteractive", "-Command", script]),
            &[],
        )
        .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn systemd_unit_path() -> PathBuf {
        Path::new(SYSTEMD_UNIT_DIR).join(SYSTEMD_UNIT)
    }
}

impl HostInspect for SystemHost {
    fn marker_present(&self, marker: PendingMarker) -> Result<bool, HostError> {
        match (self.family, marker) {
            (OsFamily::Windows, marker) => Self::windows_marker(marker),
            (OsFamily::Debian | OsFamily::Ubuntu, PendingMarker::ComponentServicing) => {
                Ok(Path::new(DEBIAN_REBOOT_REQUIRED).exists())
            }
            (OsFamily::Fedora | OsFamily::CentOs, PendingMarker::UpdateRebootRequired) => {
                Self::needs_restarting()
            }
            (OsFamily::ArchLinux, PendingMarker::UpdateRebootRequired) => {
                Self::running_kernel_modules_missing()
            }
            _ => Ok(false),
        }
    }

    fn management_agent_reboot_pending(&self) -> Result<bool, HostError> {
        if self.family != OsFamily::Windows {
            return Err(self.unsupported("management agent"));
        }
        let stdout = exec::stdout_of(
            "powershell",
            &["-NoProfile", "-NonInteractive", "-Command", AGENT_QUERY],
        )?;
        parse_bool("powershell", &stdout)
    }

    fn feature_state(&self, feature: &str) -> Result<FeatureState, HostError> {
        if self.family != OsFamily::Windows {
            return Err(self.unsupported("optional features"));
        }
        let name = format!("/featurename:{feature}");
        let stdout = exec::stdout_of("dism", &["/online", "/get-featureinfo", &name])?;
        parse_dism_state(&stdout).ok_or_else(|| HostError::Parse {
            program: "dism".into(),
            detail: format!("no state line for feature {feature}"),
        })
    }

    fn service_running(&self, service: &str) -> Result<bool, HostError> {
        match self.family {
            OsFamily::Windows => {
                let output = exec::capture("sc", &["query", service])?;
                Ok(output.status.success()
                    && sc_reports_running(&String::from_utf8_lossy(&output.stdout)))
            }
            OsFamily::MacOs => Ok(exec::capture("launchctl", &["list", service])?
                .status
                .success()),
            _ => Ok(exec::capture("systemctl", &["is-active", "--quiet", service])?
                .status
                .success()),
        }
    }
}

impl ProgramDetector for SystemHost {
    fn is_program_installed(&self, name: &str) -> Result<bool, HostError> {
        self.detector.is_program_installed(name)
    }
}

#[async_trait]
impl Actuator for SystemHost {
    async fn enable_feature(&self, feature: &str) -> Result<(), HostError> {
        if self.family != OsFamily::Windows {
            return Err(self.unsupported("optional features"));
        }
        info!(feature, "Enabling optional feature");
        exec::run(
            "dism",
            &args(&[
                "/online",
                "/enable-feature",
                &format!("/featurename:{feature}"),
                "/all",
                "/norestart",
            ]),
            &[ERROR_SUCCESS_REBOOT_REQUIRED],
        )
        .await?;
        Ok(())
    }

    async fn install_package(&self, package: &str) -> Result<(), HostError> {
        info!(package, family = %self.family, "Installing package");
        let (program, argv) = install_command(self.family, package);
        exec::run(program, &argv, &[]).await?;
        Ok(())
    }

    async fn run_installer(&self, path: &Path, argv: &[String]) -> Result<(), HostError> {
        let program = path.display().to_string();
        info!(installer = %program, "Running installer");
        exec::run(&program, argv, &[ERROR_SUCCESS_REBOOT_REQUIRED]).await?;
        Ok(())
    }

    async fn run_command(&self, program: &str, argv: &[String]) -> Result<(), HostError> {
        exec::run(program, argv, &[]).await?;
        Ok(())
    }

    async fn apply_updates(&self) -> Result<usize, HostError> {
        let applied = match self.family {
            OsFamily::Windows => {
                let stdout = Self::powershell(WINDOWS_UPDATE_SCRIPT).await?;
                stdout.trim().parse().map_err(|_| HostError::Parse {
                    program: "powershell".into(),
                    detail: format!("expected an update count, got '{}'", stdout.trim()),
                })?
            }
            OsFamily::Debian | OsFamily::Ubuntu => {
                exec::run("apt-get", &args(&["update", "-q"]), &[]).await?;
                let listed = exec::run("apt", &args(&["list", "--upgradable"]), &[]).await?;
                let count = count_apt_upgradable(&String::from_utf8_lossy(&listed.stdout));
                if count > 0 {
                    exec::run(
                        "apt-get",
                        &args(&["-y", "-o", "Dpkg::Options::=--force-confold", "upgrade"]),
                        &[],
                    )
                    .await?;
                }
                count
            }
            OsFamily::Fedora | OsFamily::CentOs => {
                let tool = package_tool(self.family);
                // Exit 100 means updates are available.
                let listed = exec::run(tool, &args(&["check-update", "-q"]), &[100]).await?;
                let count = if listed.status.code() == Some(100) {
                    count_rpm_updates(&String::from_utf8_lossy(&listed.stdout))
                } else {
                    0
                };
                if count > 0 {
                    exec::run(tool, &args(&["-y", "upgrade"]), &[]).await?;
                }
                count
            }
            OsFamily::ArchLinux => {
                exec::run("pacman", &args(&["-Sy", "--noconfirm"]), &[]).await?;
                // Exit 1 means nothing to upgrade.
                let listed = exec::run("pacman", &args(&["-Qu"]), &[1]).await?;
                let count = count_nonempty_lines(&String::from_utf8_lossy(&listed.stdout));
                if count > 0 {
                    exec::run("pacman", &args(&["-Su", "--noconfirm"]), &[]).await?;
                }
                count
            }
            OsFamily::MacOs => {
                let listed = exec::run("softwareupdate", &args(&["--list"]), &[]).await?;
                let count = count_softwareupdate_labels(&String::from_utf8_lossy(&listed.stdout));
                if count > 0 {
                    exec::run("softwareupdate", &args(&["--install", "--all"]), &[]).await?;
                }
                count
            }
        };

        debug!(applied, family = %self.family, "Update batch finished");
        Ok(applied)
    }

    async fn schedule_resume(&self) -> Result<(), HostError> {
        let command = self.resume_command()?;
        match self.family {
            OsFamily::Windows => {
                let line = windows_command_line(&command);
                exec::run(
                    "reg",
                    &args(&[
                        "add",
                        RUN_ONCE_KEY,
                        "/v",
                        RUN_ONCE_VALUE,
                        "/t",
                        "REG_SZ",
                        "/d",
                        &line,
                        "/f",
                    ]),
                    &[],
                )
                .await?;
            }
            OsFamily::MacOs => return Err(self.unsupported("resume hook")),
            _ => {
                tokio::fs::write(Self::systemd_unit_path(), systemd_unit(&command)).await?;
                exec::run("systemctl", &args(&["daemon-reload"]), &[]).await?;
                exec::run("systemctl", &args(&["enable", SYSTEMD_UNIT]), &[]).await?;
            }
        }
        info!("Registered resume hook");
        Ok(())
    }

    async fn clear_resume(&self) -> Result<(), HostError> {
        match self.family {
            OsFamily::Windows => {
                // Exit 1: the value was already consumed by the boot.
                exec::run(
                    "reg",
                    &args(&["delete", RUN_ONCE_KEY, "/v", RUN_ONCE_VALUE, "/f"]),
                    &[1],
                )
                .await?;
            }
            OsFamily::MacOs => {}
            _ => {
                let unit = Self::systemd_unit_path();
                if unit.exists() {
                    exec::run("systemctl", &args(&["disable", SYSTEMD_UNIT]), &[1]).await?;
                    tokio::fs::remove_file(&unit).await?;
                    exec::run("systemctl", &args(&["daemon-reload"]), &[]).await?;
                }
            }
        }
        Ok(())
    }

    async fn restart(&self) -> Result<(), HostError> {
        info!(delay_secs = self.restart_delay_secs, "Restarting machine");
        match self.family {
            OsFamily::Windows => {
                exec::run(
                    "shutdown",
                    &args(&["/r", "/t", &self.restart_delay_secs.to_string()]),
                    &[],
                )
                .await?;
            }
            _ => {
                let when = unix_shutdown_when(self.restart_delay_secs);
                exec::run("shutdown", &args(&["-r", &when]), &[]).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for SystemHost {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), HostError> {
        self.fetcher.fetch(url, dest).await
    }
}

fn package_tool(family: OsFamily) -> &'static str {
    match family {
        OsFamily::CentOs => "yum",
        _ => "dnf",
    }
}

/// Package manager invocation that installs `package` non-interactively.
fn install_command(family: OsFamily, package: &str) -> (&'static str, Vec<String>) {
    match family {
        OsFamily::Windows => (
            "winget",
            args(&[
                "install",
                "--id",
                package,
                "--exact",
                "--silent",
                "--accept-package-agreements",
                "--accept-source-agreements",
            ]),
        ),
        OsFamily::Debian | OsFamily::Ubuntu => ("apt-get", args(&["install", "-y", package])),
        OsFamily::Fedora | OsFamily::CentOs => {
            (package_tool(family), args(&["install", "-y", package]))
        }
        OsFamily::ArchLinux => ("pacman", args(&["-S", "--needed", "--noconfirm", package])),
        OsFamily::MacOs => ("brew", args(&["install", package])),
    }
}

/// Whether `reg query ... /v PendingFileRenameOperations` output carries data.
fn pending_renames_present(output: &str) -> bool {
    output.lines().any(|line| {
        line.split_once("REG_MULTI_SZ")
            .is_some_and(|(_, data)| !data.trim().is_empty())
    })
}

/// Parse the `State : Enabled` line of `dism /get-featureinfo`.
fn parse_dism_state(output: &str) -> Option<FeatureState> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if !key.trim().eq_ignore_ascii_case("state") {
            return None;
        }
        let value = value.trim();
        if value.eq_ignore_ascii_case("enabled") {
            Some(FeatureState::Enabled)
        } else {
            // "Disabled", "Enable Pending" and "Disabled with Payload Removed"
            // all mean the feature is not usable yet.
            Some(FeatureState::Disabled)
        }
    })
}

fn sc_reports_running(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.trim_start().starts_with("STATE") && line.contains("RUNNING"))
}

fn parse_bool(program: &str, output: &str) -> Result<bool, HostError> {
    match output.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(HostError::Parse {
            program: program.to_string(),
            detail: format!("expected True or False, got '{other}'"),
        }),
    }
}

fn count_apt_upgradable(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.contains("[upgradable from"))
        .count()
}

/// Count package rows in `dnf check-update` output, stopping at the
/// "Obsoleting Packages" section.
fn count_rpm_updates(output: &str) -> usize {
    output
        .lines()
        .take_while(|line| !line.starts_with("Obsoleting"))
        .filter(|line| line.split_whitespace().count() >= 3)
        .count()
}

fn count_nonempty_lines(output: &str) -> usize {
    output.lines().filter(|l| !l.trim().is_empty()).count()
}

fn count_softwareupdate_labels(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("* Label:"))
        .count()
}

/// `shutdown -r` time argument: `now` below one minute, `+N` minutes otherwise.
fn unix_shutdown_when(delay_secs: u32) -> String {
    if delay_secs < 60 {
        "now".into()
    } else {
        format!("+{}", delay_secs.div_ceil(60))
    }
}

fn windows_command_line(command: &[String]) -> String {
    command
        .iter()
        .map(|part| {
            if part.contains(' ') {
                format!("\"{part}\"")
            } else {
                part.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Oneshot unit that runs the resume command once the network is up.
fn systemd_unit(command: &[String]) -> String {
    let exec_start = command
        .iter()
        .map(|part| {
            if part.contains(char::is_whitespace) {
                format!("\"{part}\"")
            } else {
                part.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        "[Unit]\n\
         Description=Resume hostprep provisioning after restart\n\
         Wants=network-online.target\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         ExecStart={exec_start}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}
