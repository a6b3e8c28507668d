//! Provisioning configuration.
//!
//! Everything has a default, so running without a config file is the normal
//! case. A TOML file can override any field, and CLI flags override the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::os::OsFamily;
use crate::plan::DEFAULT_CONTAINER_RUNTIME_URL;
use crate::step::Step;

/// Directory name used under the platform data directory.
const APP_DIR: &str = "hostprep";

/// Full provisioning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Target operating system; prompted for or detected when unset.
    pub os: Option<OsFamily>,
    /// Checkpoint file location.
    pub checkpoint_path: PathBuf,
    /// Where installer payloads are downloaded.
    pub download_dir: PathBuf,
    /// Maximum update passes before giving up on a settled host.
    pub max_update_passes: u32,
    /// Whether the reboot probe queries the optional management agent.
    pub consult_management_agent: bool,
    /// Whether to register a resume hook before restarting.
    pub register_resume: bool,
    /// Grace period before the machine restarts.
    pub restart_delay_secs: u32,
    /// Container runtime installer URL (Windows).
    pub container_runtime_url: String,
    /// Explicit step plan replacing the built-in one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        let base = default_data_dir();
        Self {
            os: None,
            checkpoint_path: base.join("checkpoint.json"),
            download_dir: base.join("downloads"),
            max_update_passes: 3,
            consult_management_agent: true,
            register_resume: true,
            restart_delay_secs: 5,
            container_runtime_url: DEFAULT_CONTAINER_RUNTIME_URL.into(),
            steps: None,
        }
    }
}

impl ProvisionConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ProvisionError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml(content: &str) -> Result<Self, ProvisionError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ProvisionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when given, otherwise use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicitly given file cannot be loaded.
    pub fn load(path: Option<&Path>) -> Result<Self, ProvisionError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.max_update_passes == 0 {
            return Err(ProvisionError::Config(
                "max_update_passes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Lock file guarding against concurrent runs, next to the checkpoint.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.checkpoint_path
            .parent()
            .map_or_else(|| PathBuf::from("hostprep.lock"), |p| p.join("hostprep.lock"))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Action;

    #[test]
    fn test_config_defaults() {
        let config = ProvisionConfig::default();
        assert_eq!(config.max_update_passes, 3);
        assert!(config.consult_management_agent);
        assert!(config.register_resume);
        assert!(config.os.is_none());
        assert!(config.steps.is_none());
        assert!(config.checkpoint_path.ends_with("hostprep/checkpoint.json"));
        assert_eq!(
            config.lock_path(),
            config.checkpoint_path.parent().unwrap().join("hostprep.lock")
        );
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ProvisionConfig::from_toml(
            r#"
            os = "fedora"
            max_update_passes = 5
            checkpoint_path = "/var/lib/hostprep/checkpoint.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.os, Some(OsFamily::Fedora));
        assert_eq!(config.max_update_passes, 5);
        assert_eq!(
            config.checkpoint_path,
            PathBuf::from("/var/lib/hostprep/checkpoint.json")
        );
        assert_eq!(config.restart_delay_secs, 5);
        assert_eq!(config.container_runtime_url, DEFAULT_CONTAINER_RUNTIME_URL);
    }

    #[test]
    fn test_toml_step_plan() {
        let config = ProvisionConfig::from_toml(
            r#"
            [[steps]]
            name = "ensure-updated"
            action = { kind = "ensure_updated" }

            [[steps]]
            name = "install-podman"
            reboot = "if_changed"
            guard = { kind = "package", id = "podman" }
            action = { kind = "install_package", id = "podman" }
            "#,
        )
        .unwrap();

        let steps = config.steps.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, Action::EnsureUpdated);
        assert_eq!(steps[1].name, "install-podman");
    }

    #[test]
    fn test_rejects_zero_update_passes() {
        let err = ProvisionConfig::from_toml("max_update_passes = 0").unwrap_err();
        assert!(err.to_string().contains("max_update_passes"));
    }

    #[test]
    fn test_rejects_unknown_os() {
        assert!(ProvisionConfig::from_toml(r#"os = "beos""#).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ProvisionConfig::load(Some(Path::new("/nonexistent/hostprep.toml"))).unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));
    }
}
