//! In-memory host and instrumented checkpoint store shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use hostprep::{
    Actuator, Checkpoint, CheckpointError, CheckpointStore, FeatureState, Fetcher,
    FileCheckpointStore, HostError, HostInspect, PendingMarker, ProgramDetector,
};

/// Mutable state of a [`FakeHost`].
#[derive(Debug, Default)]
pub struct FakeState {
    pub features: HashSet<String>,
    pub packages: HashSet<String>,
    pub services: HashSet<String>,
    pub markers: HashSet<PendingMarker>,
    pub agent_pending: Option<bool>,
    /// Update batches handed out by `apply_updates`: (applied, leaves a restart pending).
    pub update_batches: VecDeque<(usize, bool)>,
    /// Packages and programs whose installation or execution fails.
    pub failing: HashSet<String>,
    pub fail_restart: bool,
    /// Every mutating call, in order.
    pub actions: Vec<String>,
    pub update_passes: usize,
    pub restarts: usize,
    pub resumes_scheduled: usize,
    pub resumes_cleared: usize,
}

/// Host whose state lives in memory. A restart clears every pending marker.
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_feature(self, name: &str) -> Self {
        self.state().features.insert(name.to_string());
        self
    }

    pub fn with_package(self, id: &str) -> Self {
        self.state().packages.insert(id.to_string());
        self
    }

    pub fn with_service(self, name: &str) -> Self {
        self.state().services.insert(name.to_string());
        self
    }

    pub fn with_failing(self, name: &str) -> Self {
        self.state().failing.insert(name.to_string());
        self
    }

    pub fn with_update_batches(self, batches: &[(usize, bool)]) -> Self {
        self.state().update_batches.extend(batches.iter().copied());
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.state().actions.clone()
    }

    pub fn restarts(&self) -> usize {
        self.state().restarts
    }

    fn fail(&self, program: &str) -> HostError {
        HostError::CommandFailed {
            program: program.to_string(),
            code: Some(1),
            stderr: format!("{program} failed"),
        }
    }
}

impl HostInspect for FakeHost {
    fn marker_present(&self, marker: PendingMarker) -> Result<bool, HostError> {
        Ok(self.state().markers.contains(&marker))
    }

    fn management_agent_reboot_pending(&self) -> Result<bool, HostError> {
        self.state()
            .agent_pending
            .ok_or_else(|| HostError::Unsupported("no management agent".into()))
    }

    fn feature_state(&self, feature: &str) -> Result<FeatureState, HostError> {
        Ok(if self.state().features.contains(feature) {
            FeatureState::Enabled
        } else {
            FeatureState::Disabled
        })
    }

    fn service_running(&self, service: &str) -> Result<bool, HostError> {
        Ok(self.state().services.contains(service))
    }
}

impl ProgramDetector for FakeHost {
    fn is_program_installed(&self, name: &str) -> Result<bool, HostError> {
        Ok(self.state().packages.contains(name))
    }
}

#[async_trait]
impl Actuator for FakeHost {
    async fn enable_feature(&self, feature: &str) -> Result<(), HostError> {
        let mut state = self.state();
        state.actions.push(format!("enable_feature:{feature}"));
        state.features.insert(feature.to_string());
        state.markers.insert(PendingMarker::ComponentServicing);
        Ok(())
    }

    async fn install_package(&self, package: &str) -> Result<(), HostError> {
        if self.state().failing.contains(package) {
            return Err(self.fail(package));
        }
        let mut state = self.state();
        state.actions.push(format!("install_package:{package}"));
        state.packages.insert(package.to_string());
        Ok(())
    }

    async fn run_installer(&self, path: &Path, _args: &[String]) -> Result<(), HostError> {
        let mut state = self.state();
        state.actions.push(format!("run_installer:{}", path.display()));
        Ok(())
    }

    async fn run_command(&self, program: &str, args: &[String]) -> Result<(), HostError> {
        if self.state().failing.contains(program) {
            return Err(self.fail(program));
        }
        let mut state = self.state();
        state
            .actions
            .push(format!("run_command:{program} {}", args.join(" ")));
        Ok(())
    }

    async fn apply_updates(&self) -> Result<usize, HostError> {
        let mut state = self.state();
        state.update_passes += 1;
        let (applied, pending) = state.update_batches.pop_front().unwrap_or((0, false));
        state.actions.push(format!("apply_updates:{applied}"));
        if pending {
            state.markers.insert(PendingMarker::UpdateRebootRequired);
        }
        Ok(applied)
    }

    async fn schedule_resume(&self) -> Result<(), HostError> {
        self.state().resumes_scheduled += 1;
        Ok(())
    }

    async fn clear_resume(&self) -> Result<(), HostError> {
        self.state().resumes_cleared += 1;
        Ok(())
    }

    async fn restart(&self) -> Result<(), HostError> {
        let mut state = self.state();
        if state.fail_restart {
            return Err(HostError::CommandFailed {
                program: "shutdown".into(),
                code: Some(1),
                stderr: "access denied".into(),
            });
        }
        state.restarts += 1;
        state.markers.clear();
        state.agent_pending = state.agent_pending.map(|_| false);
        Ok(())
    }
}

#[async_trait]
impl Fetcher for FakeHost {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), HostError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, b"payload")?;
        self.state().actions.push(format!("fetch:{url}"));
        Ok(())
    }
}

/// File-backed store that counts writes and can be told to fail them.
#[derive(Debug)]
pub struct CountingStore {
    inner: FileCheckpointStore,
    saves: AtomicUsize,
    /// Saves beyond this many fail.
    allowed_saves: Option<usize>,
}

impl CountingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: FileCheckpointStore::new(path),
            saves: AtomicUsize::new(0),
            allowed_saves: None,
        }
    }

    /// Fail every save after the first `n`.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.allowed_saves = Some(n);
        self
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for CountingStore {
    fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        self.inner.load()
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let attempt = self.saves.fetch_add(1, Ordering::SeqCst);
        if self.allowed_saves.is_some_and(|allowed| attempt >= allowed) {
            return Err(CheckpointError::Write {
                path: self.inner.path().to_path_buf(),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save(checkpoint)
    }

    fn clear(&self) -> Result<bool, CheckpointError> {
        self.inner.clear()
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}

/// Read the checkpoint at `path` directly.
pub fn read_checkpoint(path: &Path) -> Option<Checkpoint> {
    FileCheckpointStore::new(path).load().unwrap()
}

/// Write a checkpoint at `path` directly.
pub fn seed_checkpoint(path: &Path, checkpoint: &Checkpoint) {
    FileCheckpointStore::new(path).save(checkpoint).unwrap();
}
