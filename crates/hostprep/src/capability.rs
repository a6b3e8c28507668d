//! Idempotency guards.
//!
//! A capability is a condition a step depends on being true. When it already
//! holds, the step is skipped. Checks never touch the network and any query
//! failure reads as "not satisfied", which at worst repeats an idempotent
//! action.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::host::{FeatureState, HostError, HostInspect, ProgramDetector};

/// A named condition on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Capability {
    /// An optional OS feature is enabled.
    Feature { name: String },
    /// A package or application is installed.
    Package { id: String },
    /// A file exists (e.g. a previously downloaded installer).
    File { path: PathBuf },
    /// A system service is running.
    Service { name: String },
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Feature { name } => write!(f, "feature {name} enabled"),
            Self::Package { id } => write!(f, "package {id} installed"),
            Self::File { path } => write!(f, "file {} present", path.display()),
            Self::Service { name } => write!(f, "service {name} running"),
        }
    }
}

/// Answers "is this capability already satisfied?".
pub struct CapabilityInspector<'a, H: ?Sized> {
    host: &'a H,
}

impl<'a, H: HostInspect + ProgramDetector + ?Sized> CapabilityInspector<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self { host }
    }

    /// Whether the capability holds. Query failures count as `false`.
    #[must_use]
    pub fn is_satisfied(&self, capability: &Capability) -> bool {
        let result: Result<bool, HostError> = match capability {
            Capability::Feature { name } => self
                .host
                .feature_state(name)
                .map(|state| state == FeatureState::Enabled),
            Capability::Package { id } => self.host.is_program_installed(id),
            Capability::File { path } => Ok(path.is_file()),
            Capability::Service { name } => self.host.service_running(name),
        };

        match result {
            Ok(satisfied) => {
                debug!(capability = %capability, satisfied, "Checked capability");
                satisfied
            }
            Err(e) => {
                debug!(capability = %capability, error = %e, "Capability query failed, treating as unsatisfied");
                false
            }
        }
    }
}
