//! Installed-program detection, one strategy per host family.
//!
//! Each family first asks its own package registry and then falls back to an
//! executable search on `PATH`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::exec;
use crate::host::{HostError, ProgramDetector};
use crate::os::OsFamily;

/// Detector backed by the host's package manager.
#[derive(Debug, Clone)]
pub struct SystemDetector {
    family: OsFamily,
    app_dirs: Vec<PathBuf>,
}

impl SystemDetector {
    #[must_use]
    pub fn new(family: OsFamily) -> Self {
        let mut app_dirs = vec![PathBuf::from("/Applications")];
        if let Some(home) = dirs::home_dir() {
            app_dirs.push(home.join("Applications"));
        }
        Self { family, app_dirs }
    }

    fn registry_lookup(&self, name: &str) -> Result<bool, HostError> {
        match self.family {
            OsFamily::Debian | OsFamily::Ubuntu => {
                let output = exec::capture("dpkg-query", &["-W", "-f=${Status}", name])?;
                Ok(output.status.success()
                    && dpkg_status_installed(&String::from_utf8_lossy(&output.stdout)))
            }
            OsFamily::Fedora | OsFamily::CentOs => {
                Ok(exec::capture("rpm", &["-q", name])?.status.success())
            }
            OsFamily::ArchLinux => Ok(exec::capture("pacman", &["-Q", name])?.status.success()),
            OsFamily::MacOs => {
                if find_app_bundle(&self.app_dirs, name).is_some() {
                    return Ok(true);
                }
                Ok(exec::capture("brew", &["list", "--versions", name])?
                    .status
                    .success())
            }
            OsFamily::Windows => {
                let output = exec::capture(
                    "winget",
                    &[
                        "list",
                        "--id",
                        name,
                        "--exact",
                        "--accept-source-agreements",
                    ],
                )?;
                Ok(output.status.success()
                    && winget_lists(&String::from_utf8_lossy(&output.stdout), name))
            }
        }
    }
}

impl ProgramDetector for SystemDetector {
    fn is_program_installed(&self, name: &str) -> Result<bool, HostError> {
        let registry = self.registry_lookup(name);
        if let Ok(true) = registry {
            return Ok(true);
        }

        if which::which(name).is_ok() {
            debug!(program = name, "Found executable on PATH");
            return Ok(true);
        }

        registry
    }
}

/// Whether a `dpkg-query -f=${Status}` line reports an installed package.
#[must_use]
pub fn dpkg_status_installed(status: &str) -> bool {
    status.trim() == "install ok installed"
}

/// Whether `winget list` output contains a row for `id`.
#[must_use]
pub fn winget_lists(output: &str, id: &str) -> bool {
    output
        .lines()
        .any(|line| line.split_whitespace().any(|col| col.eq_ignore_ascii_case(id)))
}

/// Find `<name>.app` (case-insensitive) in any of `dirs`.
#[must_use]
pub fn find_app_bundle(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    let wanted = format!("{name}.app").to_lowercase();
    dirs.iter()
        .filter_map(|dir| std::fs::read_dir(dir).ok())
        .flat_map(|entries| entries.filter_map(Result::ok))
        .map(|entry| entry.path())
        .find(|path| is_bundle_named(path, &wanted))
}

fn is_bundle_named(path: &Path, wanted: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.to_lowercase() == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dpkg_status() {
        assert!(dpkg_status_installed("install ok installed"));
        assert!(!dpkg_status_installed("deinstall ok config-files"));
        assert!(!dpkg_status_installed(""));
    }

    #[test]
    fn test_winget_output() {
        let output = "\
Name            Id                   Version Source
---------------------------------------------------
Docker Desktop  Docker.DockerDesktop 4.30.0  winget
";
        assert!(winget_lists(output, "Docker.DockerDesktop"));
        assert!(winget_lists(output, "docker.dockerdesktop"));
        assert!(!winget_lists(output, "Git.Git"));
        assert!(!winget_lists("No installed package found matching input criteria.", "Git.Git"));
    }

    #[test]
    fn test_find_app_bundle() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Docker.app")).unwrap();
        let dirs = vec![dir.path().to_path_buf(), PathBuf::from("/nonexistent")];

        assert_eq!(
            find_app_bundle(&dirs, "docker"),
            Some(dir.path().join("Docker.app"))
        );
        assert!(find_app_bundle(&dirs, "podman").is_none());
    }
}
