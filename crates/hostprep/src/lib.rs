//! Resumable, reboot-aware development host provisioning.
//!
//! A provisioning run is an ordered list of idempotent [`Step`]s. Progress is
//! recorded in a durable [`Checkpoint`] so that a run interrupted by a
//! machine restart continues at the right step when the program is started
//! again. Steps that cannot finish without a restart (optional features,
//! software updates, installers) make the runner persist the checkpoint and
//! restart the machine.
//!
//! # Example
//!
//! ```ignore
//! use hostprep::{
//!     FileCheckpointStore, OsFamily, Plan, ProvisionConfig, RunnerSettings, SystemHost,
//!     WorkflowRunner,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProvisionConfig::default();
//!     let plan = Plan::resolve(OsFamily::Ubuntu, &config)?;
//!     let host = SystemHost::new(OsFamily::Ubuntu)?;
//!     let store = FileCheckpointStore::new(&config.checkpoint_path);
//!     let mut runner = WorkflowRunner::new(plan, &host, store, RunnerSettings::default());
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]
// Allow async functions that don't use await (may need await in future)
#![allow(clippy::unused_async)]

pub mod capability;
pub mod checkpoint;
pub mod commands;
pub mod config;
pub mod detect;
pub mod error;
pub mod exec;
pub mod host;
pub mod lock;
pub mod os;
pub mod plan;
pub mod reboot;
pub mod step;
pub mod ui;
pub mod workflow;

pub use capability::{Capability, CapabilityInspector};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use config::ProvisionConfig;
pub use error::{CheckpointError, ProvisionError};
pub use host::{
    Actuator, FeatureState, Fetcher, Host, HostError, HostInspect, HttpFetcher, PendingMarker,
    ProgramDetector, SystemHost,
};
pub use os::OsFamily;
pub use plan::Plan;
pub use reboot::RebootProbe;
pub use step::{Action, RebootPolicy, Step, StepOutcome};
pub use workflow::{RunOutcome, RunState, RunnerSettings, StepRecord, WorkflowRunner};
