//! Host seam.
//!
//! Everything the workflow knows about the machine it provisions goes
//! through the traits in this module: read-only introspection
//! ([`HostInspect`], [`ProgramDetector`]), mutating actions ([`Actuator`])
//! and payload acquisition ([`Fetcher`]). [`SystemHost`] is the real
//! implementation; tests substitute in-memory fakes.

mod fetch;
mod system;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fetch::HttpFetcher;
pub use system::SystemHost;

/// Errors reported by host queries and actions.
#[derive(Error, Debug)]
pub enum HostError {
    /// A helper program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A helper program exited unsuccessfully.
    #[error("{program} exited with code {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The query or action has no meaning on this host family.
    #[error("not supported on {0}")]
    Unsupported(String),

    /// Output from a helper program could not be interpreted.
    #[error("unexpected output from {program}: {detail}")]
    Parse { program: String, detail: String },
}

/// Persistent markers that indicate a restart is needed to finish pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingMarker {
    /// Component servicing finished staging and waits for a restart.
    ComponentServicing,
    /// The update subsystem requires a restart.
    UpdateRebootRequired,
    /// File rename operations are queued for the next boot.
    PendingFileRenames,
}

impl PendingMarker {
    /// All markers, in probe order.
    pub const ALL: [Self; 3] = [
        Self::ComponentServicing,
        Self::UpdateRebootRequired,
        Self::PendingFileRenames,
    ];

    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::ComponentServicing => "Component servicing reboot pending",
            Self::UpdateRebootRequired => "Update reboot required",
            Self::PendingFileRenames => "Pending file rename operations",
        }
    }
}

/// State of an optional OS feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureState {
    Enabled,
    Disabled,
}

/// Read-only, side-effect free host introspection.
pub trait HostInspect: Send + Sync {
    /// Whether a persistent restart marker is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker location cannot be queried.
    fn marker_present(&self, marker: PendingMarker) -> Result<bool, HostError>;

    /// Ask the optional management agent whether it wants a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if no agent is installed or the query fails.
    fn management_agent_reboot_pending(&self) -> Result<bool, HostError>;

    /// Current state of an optional OS feature.
    ///
    /// # Errors
    ///
    /// Returns an error if feature state cannot be queried on this host.
    fn feature_state(&self, feature: &str) -> Result<FeatureState, HostError>;

    /// Whether a named system service is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the service manager cannot be queried.
    fn service_running(&self, service: &str) -> Result<bool, HostError>;
}

/// Lower-level "is this program installed" primitive, one implementation per host family.
pub trait ProgramDetector: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the package registry cannot be queried.
    fn is_program_installed(&self, name: &str) -> Result<bool, HostError>;
}

/// Mutating host actions.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Enable an optional OS feature.
    async fn enable_feature(&self, feature: &str) -> Result<(), HostError>;

    /// Install a package with the host's package manager.
    async fn install_package(&self, package: &str) -> Result<(), HostError>;

    /// Run a previously downloaded installer.
    async fn run_installer(&self, path: &Path, args: &[String]) -> Result<(), HostError>;

    /// Run an arbitrary command to completion.
    async fn run_command(&self, program: &str, args: &[String]) -> Result<(), HostError>;

    /// Apply one batch of available software updates.
    ///
    /// Returns the number of updates that were applied.
    async fn apply_updates(&self) -> Result<usize, HostError>;

    /// Register this program to run again after the next restart.
    async fn schedule_resume(&self) -> Result<(), HostError>;

    /// Remove a previously registered resume hook.
    async fn clear_resume(&self) -> Result<(), HostError>;

    /// Request a full machine restart.
    async fn restart(&self) -> Result<(), HostError>;
}

/// Installer payload acquisition.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` to `dest`. `dest` only appears once the download is complete.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), HostError>;
}

/// Everything the workflow needs from a host.
pub trait Host: HostInspect + ProgramDetector + Actuator + Fetcher {}

impl<T> Host for T where T: HostInspect + ProgramDetector + Actuator + Fetcher {}
