//! CLI commands.

pub mod plan;
pub mod probe;
pub mod reset;
pub mod run;
pub mod status;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::ProvisionConfig;
use crate::os::OsFamily;

/// Load configuration and apply a checkpoint path override.
fn load_config(config_path: Option<&Path>, checkpoint: Option<&PathBuf>) -> Result<ProvisionConfig> {
    let mut config = ProvisionConfig::load(config_path)?;
    if let Some(path) = checkpoint {
        config.checkpoint_path.clone_from(path);
    }
    Ok(config)
}

/// Pick the host family: flag, then config, then detection. When `prompt`
/// is set and stdin is a terminal, the operator confirms the detected value.
fn resolve_os(flag: Option<OsFamily>, config: &ProvisionConfig, prompt: bool) -> Result<OsFamily> {
    if let Some(os) = flag.or(config.os) {
        return Ok(os);
    }

    let detected = OsFamily::detect();
    if prompt && std::io::stdin().is_terminal() {
        return OsFamily::select_interactive(detected);
    }

    detected.context("could not detect the operating system; pass --os")
}
