//! Resumable provisioning workflow.
//!
//! The runner walks the plan from the checkpointed index. After every step
//! it decides whether the machine must restart; if so it writes the
//! checkpoint, asks for a restart and returns. The next process invocation
//! (started by the resume hook or by hand) picks up from the written index.
//!
//! ```text
//! Idle -> Running -> AwaitingReboot
//!                 -> Completed
//!                 -> Aborted
//! ```

use tracing::{error, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::ProvisionError;
use crate::host::Host;
use crate::plan::Plan;
use crate::reboot::RebootProbe;
use crate::step::{Step, StepOutcome};
use crate::ui;

/// Runner lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    AwaitingReboot,
    Completed,
    Aborted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::AwaitingReboot => write!(f, "awaiting reboot"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Runner tunables.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Maximum update passes before the update step fails.
    pub max_update_passes: u32,
    /// Whether the reboot probe queries the management agent.
    pub consult_management_agent: bool,
    /// Whether to register a resume hook before restarting.
    pub register_resume: bool,
    /// Stop at a restart decision without actually restarting.
    pub skip_restart: bool,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_update_passes: 3,
            consult_management_agent: true,
            register_resume: true,
            skip_restart: false,
        }
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub index: usize,
    pub name: String,
    pub outcome: StepOutcome,
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step is done.
    Completed { executed: Vec<StepRecord> },
    /// A restart was requested; the next invocation resumes at `resume_at`.
    AwaitingReboot {
        resume_at: usize,
        executed: Vec<StepRecord>,
    },
}

impl RunOutcome {
    /// Steps executed during this invocation.
    #[must_use]
    pub fn executed(&self) -> &[StepRecord] {
        match self {
            Self::Completed { executed } | Self::AwaitingReboot { executed, .. } => executed,
        }
    }

    /// Number of executions that changed the host.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.executed()
            .iter()
            .filter(|r| r.outcome == StepOutcome::Success)
            .count()
    }
}

/// What the runner does after a step that did not fail.
enum Next {
    Continue,
    Restart { resume_at: usize },
}

/// Drives a plan against a host, persisting progress in a checkpoint store.
pub struct WorkflowRunner<'a, H: ?Sized, S> {
    steps: Vec<Step>,
    host: &'a H,
    store: S,
    settings: RunnerSettings,
    state: RunState,
}

impl<'a, H: Host + ?Sized, S: CheckpointStore> WorkflowRunner<'a, H, S> {
    pub fn new(plan: Plan, host: &'a H, store: S, settings: RunnerSettings) -> Self {
        Self {
            steps: plan.into_steps(),
            host,
            store,
            settings,
            state: RunState::Idle,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The checkpoint store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run from the checkpoint until completion, a restart or a failure.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::StepFailed`] or [`ProvisionError::RetryExhausted`]
    /// when a step fails (the checkpoint keeps pointing at that step),
    /// [`ProvisionError::Persistence`] when progress cannot be recorded, and
    /// [`ProvisionError::Restart`] when the restart request itself fails.
    pub async fn run(&mut self) -> Result<RunOutcome, ProvisionError> {
        self.state = RunState::Idle;
        let mut checkpoint = match self.store.load_or_init() {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                self.state = RunState::Aborted;
                return Err(e.into());
            }
        };
        let total = self.steps.len();

        if checkpoint.is_complete(total) {
            info!(total, "Provisioning already complete");
            self.state = RunState::Completed;
            return Ok(RunOutcome::Completed {
                executed: Vec::new(),
            });
        }

        if checkpoint.next_step_index > 0 {
            ui::print_info(&format!(
                "Resuming at step {} of {total}",
                checkpoint.next_step_index + 1
            ));
        }
        if let Some(previous) = &checkpoint.last_error {
            ui::print_warning(&format!("Previous run failed: {previous}"));
        }

        self.state = RunState::Running;
        let mut executed = Vec::new();

        for index in checkpoint.next_step_index..total {
            checkpoint.next_step_index = index;
            let step = &self.steps[index];
            ui::print_progress_step(index + 1, total, step.label());
            info!(index, step = %step.name, "Executing step");

            let outcome = match self.execute(step, index, &mut checkpoint).await {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.abort(&mut checkpoint, e).await),
            };

            executed.push(StepRecord {
                index,
                name: step.name.clone(),
                outcome: outcome.clone(),
            });
            ui::print_step_outcome(step.label(), &outcome);

            if let StepOutcome::Failed(reason) = &outcome {
                let err = ProvisionError::StepFailed {
                    index,
                    step: step.name.clone(),
                    reason: reason.clone(),
                };
                return Err(self.abort(&mut checkpoint, err).await);
            }


            match self.after_step(step, index, &outcome, &mut checkpoint) {
                Ok(Next::Continue) => {}
                Ok(Next::Restart { resume_at }) => {
                    return self.restart(checkpoint, resume_at, executed).await;
                }
                Err(e) => return Err(self.abort(&mut checkpoint, e).await),
            }
        }

        checkpoint.next_step_index = total;
        checkpoint.update_retry_count = 0;
        checkpoint.last_error = None;
        self.persist(&checkpoint)?;
        self.state = RunState::Completed;

        self.remove_resume_hook().await;

        info!(total, "Provisioning complete");
        Ok(RunOutcome::Completed { executed })
    }

    /// Execute one step, applying the update-pass budget for repeating steps.
    async fn execute(
        &self,
        step: &Step,
        index: usize,
        checkpoint: &mut Checkpoint,
    ) -> Result<StepOutcome, ProvisionError> {
        if !step.repeats_until_settled() {
            return Ok(step.execute(self.host).await);
        }

        if checkpoint.update_retry_count >= self.settings.max_update_passes {
            return Err(self.exhausted(step, index, checkpoint));
        }

        let outcome = step.execute(self.host).await;
        if !outcome.is_failed() {
            checkpoint.update_retry_count += 1;
            info!(
                step = %step.name,
                pass = checkpoint.update_retry_count,
                max = self.settings.max_update_passes,
                "Update pass finished"
            );
        }
        Ok(outcome)
    }

    /// Decide whether a restart is needed after a step that did not fail.
    fn after_step(
        &self,
        step: &Step,
        index: usize,
        outcome: &StepOutcome,
        checkpoint: &mut Checkpoint,
    ) -> Result<Next, ProvisionError> {
        let pending = RebootProbe::new(self.host)
            .with_management_agent(self.settings.consult_management_agent)
            .is_reboot_pending();

        if step.repeats_until_settled() {
            if !pending {
                checkpoint.update_retry_count = 0;
                return Ok(Next::Continue);
            }
            if checkpoint.update_retry_count >= self.settings.max_update_passes {
                return Err(self.exhausted(step, index, checkpoint));
            }
            return Ok(Next::Restart { resume_at: index });
        }

        if step.reboot.requires_restart(outcome) || pending {
            info!(
                step = %step.name,
                policy = %step.reboot,
                host_pending = pending,
                "Restart required"
            );
            checkpoint.update_retry_count = 0;
            return Ok(Next::Restart {
                resume_at: index + 1,
            });
        }

        Ok(Next::Continue)
    }

    fn exhausted(&self, step: &Step, index: usize, checkpoint: &Checkpoint) -> ProvisionError {
        ProvisionError::RetryExhausted {
            index,
            step: step.name.clone(),
            passes: checkpoint
                .update_retry_count
                .max(self.settings.max_update_passes),
        }
    }

    /// Persist the checkpoint and request a restart.
    async fn restart(
        &mut self,
        mut checkpoint: Checkpoint,
        resume_at: usize,
        executed: Vec<StepRecord>,
    ) -> Result<RunOutcome, ProvisionError> {
        checkpoint.next_step_index = resume_at;
        checkpoint.last_error = None;
        self.persist(&checkpoint)?;
        self.state = RunState::AwaitingReboot;

        if self.settings.skip_restart {
            ui::print_warning(
                "A restart is required. Restart the machine and run hostprep again to continue.",
            );
            return Ok(RunOutcome::AwaitingReboot {
                resume_at,
                executed,
            });
        }

        if self.settings.register_resume {
            if let Err(e) = self.host.schedule_resume().await {
                warn!(error = %e, "Failed to register resume hook, re-run hostprep manually after restart");
                ui::print_warning("Could not register automatic resume. Re-run hostprep after the restart.");
            }
        }

        ui::print_section("Restarting");
        ui::print_info("The machine will restart now. Provisioning resumes automatically afterwards.");
        info!(resume_at, "Requesting restart");

        self.host
            .restart()
            .await
            .map_err(ProvisionError::Restart)?;

        Ok(RunOutcome::AwaitingReboot {
            resume_at,
            executed,
        })
    }

    async fn remove_resume_hook(&self) {
        if self.settings.register_resume {
            if let Err(e) = self.host.clear_resume().await {
                warn!(error = %e, "Failed to remove resume hook");
            }
        }
    }

    fn persist(&mut self, checkpoint: &Checkpoint) -> Result<(), ProvisionError> {
        self.store.save(checkpoint).map_err(|e| {
            self.state = RunState::Aborted;
            ProvisionError::Persistence(e)
        })
    }

    /// Record a failure with the cursor on the failed step and return the error to surface.
    ///
    /// A failed run is never resumed automatically, so the resume hook goes too.
    async fn abort(&mut self, checkpoint: &mut Checkpoint, err: ProvisionError) -> ProvisionError {
        self.state = RunState::Aborted;
        self.remove_resume_hook().await;
        if matches!(err, ProvisionError::Persistence(_)) {
            return err;
        }

        error!(error = %err, "Provisioning aborted");
        checkpoint.update_retry_count = 0;
        checkpoint.last_error = Some(err.to_string());

        match self.store.save(checkpoint) {
            Ok(()) => err,
            Err(persist) => {
                error!(error = %err, "Step failure could not be recorded");
                ProvisionError::Persistence(persist)
            }
        }
    }
}
