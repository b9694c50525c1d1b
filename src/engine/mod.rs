//! The Sync Engine: orchestrates one sync pass for a single repository.

mod classify;
mod phases;
pub mod events;
pub mod timing;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub use classify::{ClassifyInput, Decision};
pub use events::{EngineEvent, EventSink, LogLevel};
pub use timing::{PerformanceSummary, PhaseName, PhaseTiming};

use crate::concurrency::ConcurrencyLimiter;
use crate::git::{Repository, SyncError};
use crate::retry::RetryConfig;

/// Immutable for the lifetime of one [`Engine`]. Constructed once from a
/// validated [`crate::config::RepoConfig`].
#[derive(Debug, Clone)]
pub struct RepoContext {
    pub repo_url: String,
    pub bare_repo_path: PathBuf,
    pub worktree_base: PathBuf,
    pub default_branch_name: String,
    pub skip_lfs: bool,
    pub update_existing: bool,
    pub branch_max_age: Option<Duration>,
    pub files_to_copy_on_branch_create: Vec<String>,
    pub retry: RetryConfig,
}

/// A cooperative cancellation signal, observed at every suspension point
/// (git invocation, fs syscall, retry sleep, semaphore acquire) per §5. No
/// in-flight subprocess is forcibly killed — cancellation only prevents
/// *starting* the next one.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.state;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.0.lock().unwrap()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one repository's bare clone and runs sync passes against it. At most
/// one pass runs at a time per instance — enforced by `in_progress`, checked
/// before phase 0 and cleared on every exit path (success, per-phase error,
/// or cancellation).
pub struct Engine {
    pub context: RepoContext,
    repository: Repository,
    limiter: ConcurrencyLimiter,
    in_progress: AtomicBool,
    events: EventSink,
    cancellation: CancellationToken,
}

impl Engine {
    pub fn new(
        context: RepoContext,
        limiter: ConcurrencyLimiter,
        events: EventSink,
        cancellation: CancellationToken,
    ) -> Self {
        let repository = Repository::new(context.repo_url.clone(), context.bare_repo_path.clone());
        Self {
            context,
            repository,
            limiter,
            in_progress: AtomicBool::new(false),
            events,
            cancellation,
        }
    }

    pub fn is_sync_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Clone the bare repository (if needed) and detect the default branch.
    /// Must be called once before the first [`Self::sync`].
    pub fn initialize(&mut self) -> anyhow::Result<()> {
        let detected = self.repository.initialize_bare()?;
        if self.context.default_branch_name.is_empty() {
            self.context.default_branch_name = detected;
        }
        Ok(())
    }

    /// Run one full sync pass: prune → fetch → enumerate → orphan cleanup →
    /// classify → create missing → finalize. Refuses to start if another
    /// pass is already in progress on this instance, returning
    /// `Ok(PerformanceSummary::default())` rather than an error, since "a
    /// sync is already running" isn't a failure from the caller's point of
    /// view — cron ticks observe this and simply skip, not error out.
    pub fn sync(&self) -> anyhow::Result<PerformanceSummary> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            events::emit_log(
                &self.events,
                LogLevel::Debug,
                "sync already in progress, skipping",
            );
            return Ok(PerformanceSummary::default());
        }

        let result = self.run_pass();
        self.in_progress.store(false, Ordering::SeqCst);
        result
    }

    fn run_pass(&self) -> anyhow::Result<PerformanceSummary> {
        if self.repository.bare_repo_path().as_os_str().is_empty() {
            return Err(SyncError::GitNotInitialized.into());
        }

        let mut summary = PerformanceSummary::default();

        summary.record(phases::phase0_prune(self)?);
        if self.cancellation.is_cancelled() {
            return Ok(summary);
        }

        summary.record(phases::phase1_fetch(self)?);
        if self.cancellation.is_cancelled() {
            return Ok(summary);
        }

        let (timing, enumeration) = phases::phase2_enumerate(self)?;
        summary.record(timing);
        if self.cancellation.is_cancelled() {
            return Ok(summary);
        }

        summary.record(phases::phase3_orphan_cleanup(self, &enumeration)?);
        if self.cancellation.is_cancelled() {
            return Ok(summary);
        }

        let (timing, mut plan) = phases::phase4_classify(self, &enumeration)?;
        summary.record(timing);
        if self.cancellation.is_cancelled() {
            return Ok(summary);
        }

        summary.record(phases::phase5_create_missing(self, &mut plan)?);
        if self.cancellation.is_cancelled() {
            return Ok(summary);
        }

        summary.record(phases::phase6_finalize(self, &plan)?);

        Ok(summary)
    }

    pub(crate) fn repository(&self) -> &Repository {
        &self.repository
    }

    pub(crate) fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub(crate) fn events(&self) -> &EventSink {
        &self.events
    }

    /// Thin wrapper so external collaborators (branch-creation wizard) don't
    /// need to reach into `repository()` directly.
    pub fn list_remote_branches(&self) -> anyhow::Result<Vec<String>> {
        self.repository.list_remote_branches()
    }

    pub fn list_worktrees(&self) -> anyhow::Result<Vec<crate::git::WorktreeInfo>> {
        self.repository.list_worktrees()
    }

    pub fn default_branch(&self) -> &str {
        &self.context.default_branch_name
    }

    pub fn branch_exists(&self, name: &str) -> anyhow::Result<crate::git::repository::BranchPresence> {
        self.repository.branch_exists(name)
    }

    pub fn create_branch(&self, name: &str, base: &str) -> anyhow::Result<()> {
        self.repository.create_branch(name, base)
    }

    pub fn push_branch(&self, name: &str) -> anyhow::Result<()> {
        self.repository.push_branch(name)
    }
}
