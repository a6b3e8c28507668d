//! Error types for the provisioning workflow.

use std::path::PathBuf;

use thiserror::Error;

use crate::host::HostError;

/// Errors raised while reading or writing the checkpoint record.
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// The checkpoint file exists but could not be read.
    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file could not be written or moved into place.
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint file is not a valid record.
    #[error("checkpoint {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors that end a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// A step's action failed. The cursor stays on this step.
    #[error("step '{step}' (#{index}) failed: {reason}")]
    StepFailed {
        index: usize,
        step: String,
        reason: String,
    },

    /// The update step kept reporting a pending restart after the allowed passes.
    #[error("step '{step}' (#{index}) did not settle after {passes} update passes")]
    RetryExhausted {
        index: usize,
        step: String,
        passes: u32,
    },

    /// Progress could not be tracked durably.
    #[error("cannot track provisioning progress: {0}")]
    Persistence(#[from] CheckpointError),

    /// The checkpoint was written but the restart request failed.
    #[error("restart request failed: {0}")]
    Restart(#[source] HostError),

    /// The step plan is not usable.
    #[error("invalid step plan: {0}")]
    InvalidPlan(String),

    /// Configuration could not be loaded or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Another instance holds the provisioning lock.
    #[error("another hostprep instance is running (pid {pid}, lock {path})")]
    Lock { pid: u32, path: PathBuf },

    /// The lock file could not be created or inspected.
    #[error("failed to manage lock file {path}: {source}")]
    LockFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProvisionError {
    /// Process exit status for this failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::StepFailed { .. } | Self::RetryExhausted { .. } => 1,
            Self::Persistence(_) => 2,
            Self::Restart(_)
            | Self::InvalidPlan(_)
            | Self::Config(_)
            | Self::Lock { .. }
            | Self::LockFile { .. } => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_category() {
        let step = ProvisionError::StepFailed {
            index: 3,
            step: "install-container-runtime".into(),
            reason: "exit status 1".into(),
        };
        let exhausted = ProvisionError::RetryExhausted {
            index: 2,
            step: "ensure-updated".into(),
            passes: 3,
        };
        let persistence = ProvisionError::Persistence(CheckpointError::Write {
            path: PathBuf::from("/nonexistent/checkpoint.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });

        assert_eq!(step.exit_code(), 1);
        assert_eq!(exhausted.exit_code(), 1);
        assert_eq!(persistence.exit_code(), 2);
        assert_eq!(ProvisionError::Config("bad".into()).exit_code(), 3);
    }

    #[test]
    fn test_step_failure_names_step_and_cause() {
        let err = ProvisionError::StepFailed {
            index: 3,
            step: "install-container-runtime".into(),
            reason: "installer exited with code 1603".into(),
        };
        let message = err.to_string();
        assert!(message.contains("install-container-runtime"));
        assert!(message.contains("1603"));
    }
}
