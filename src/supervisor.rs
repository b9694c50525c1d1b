//! The Engine Supervisor: owns one [`Engine`] per configured repository,
//! fans out sync passes bounded by `maxRepositories`, and schedules
//! per-repository cron ticks for the daemon path (§4.G).

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use rayon::prelude::*;

use crate::engine::{CancellationToken, Engine, PerformanceSummary};
use crate::git::Semaphore;

/// One repository's sync result, keyed by its `repoUrl` for logging.
pub type SyncResult = (String, anyhow::Result<PerformanceSummary>);

struct ScheduledTask {
    cancellation: CancellationToken,
    handle: thread::JoinHandle<()>,
}

/// Coordinates every [`Engine`] in a fleet config. One supervisor instance
/// per process; `reload` swaps its engines out in place rather than the
/// caller constructing a new supervisor, so in-flight `wait_for_quiescence`
/// callers always see the same identity.
pub struct EngineSupervisor {
    engines: Vec<Arc<Engine>>,
    repo_limiter: Semaphore,
    scheduled: Mutex<Vec<ScheduledTask>>,
}

impl EngineSupervisor {
    pub fn new(engines: Vec<Engine>, max_repositories: usize) -> Self {
        Self {
            engines: engines.into_iter().map(Arc::new).collect(),
            repo_limiter: Semaphore::new(max_repositories.max(1)),
            scheduled: Mutex::new(Vec::new()),
        }
    }

    /// Runs every engine's `sync()` once, bounded by `maxRepositories`
    /// concurrent passes. An engine that's already mid-pass (e.g. a cron
    /// tick fired early) just returns its default summary — see
    /// [`Engine::sync`].
    pub fn sync_all(&self) -> Vec<SyncResult> {
        self.engines
            .par_iter()
            .map(|engine| {
                let _guard = self.repo_limiter.acquire();
                (engine.context.repo_url.clone(), engine.sync())
            })
            .collect()
    }

    pub fn is_any_in_progress(&self) -> bool {
        self.engines.iter().any(|e| e.is_sync_in_progress())
    }

    /// Polls [`Self::is_any_in_progress`] until it's false or `timeout`
    /// elapses. Returns whether the fleet actually reached quiescence.
    pub fn wait_for_quiescence(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_any_in_progress() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(100));
        }
        true
    }

    /// Cancels every scheduled cron thread and swaps in a freshly built set
    /// of engines. Refuses to proceed until in-progress passes quiesce (30s),
    /// so a reload never yanks the bare repo or a worktree out from under a
    /// pass that's mid-git-invocation.
    pub fn reload(&mut self, engines: Vec<Engine>, max_repositories: usize) -> anyhow::Result<()> {
        if !self.wait_for_quiescence(Duration::from_secs(30)) {
            anyhow::bail!("timed out waiting for in-progress syncs to quiesce before reload");
        }
        self.cancel_scheduled();
        self.engines = engines.into_iter().map(Arc::new).collect();
        self.repo_limiter = Semaphore::new(max_repositories.max(1));
        Ok(())
    }

    fn cancel_scheduled(&self) {
        let mut scheduled = self.scheduled.lock().unwrap();
        for task in scheduled.drain(..) {
            task.cancellation.cancel();
        }
    }

    /// Every engine's cancellation token, for an outer shutdown handler
    /// (SIGINT/SIGTERM) to cancel in-progress passes and stop scheduled
    /// ticks at once.
    pub fn cancellation_tokens(&self) -> Vec<CancellationToken> {
        self.engines.iter().map(|e| e.cancellation().clone()).collect()
    }

    /// Spawns one thread per `(engine index, cron expression)` pair that
    /// sleeps until the next scheduled fire time, then calls that engine's
    /// `sync()`. A tick that lands while the previous pass is still running
    /// is skipped, not queued — `Engine::sync` already encodes that.
    pub fn schedule(&self, cron_schedules: Vec<(usize, String)>) -> anyhow::Result<()> {
        let mut scheduled = self.scheduled.lock().unwrap();
        for (index, expr) in cron_schedules {
            let engine = self
                .engines
                .get(index)
                .ok_or_else(|| anyhow::anyhow!("no engine at index {index} to schedule"))?
                .clone();
            let schedule = cron::Schedule::from_str(&expr)
                .map_err(|err| anyhow::anyhow!("invalid cron expression {expr:?}: {err}"))?;
            let cancellation = engine.cancellation().clone();
            let thread_cancellation = cancellation.clone();

            let handle = thread::spawn(move || run_schedule_loop(engine, schedule, thread_cancellation));
            scheduled.push(ScheduledTask { cancellation, handle });
        }
        Ok(())
    }
}

fn run_schedule_loop(engine: Arc<Engine>, schedule: cron::Schedule, cancellation: CancellationToken) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }
        let now = Utc::now();
        let Some(next) = schedule.after(&now).next() else {
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        if !sleep_interruptibly(wait, &cancellation) {
            return;
        }
        if let Err(err) = engine.sync() {
            log::error!("scheduled sync failed for {}: {err:#}", engine.context.repo_url);
        }
    }
}

/// Sleeps `duration` in short increments so cancellation takes effect
/// promptly rather than only at the next scheduled tick. Returns `false` if
/// cancelled mid-sleep.
fn sleep_interruptibly(duration: Duration, cancellation: &CancellationToken) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if cancellation.is_cancelled() {
            return false;
        }
        let step = remaining.min(Duration::from_millis(500));
        thread::sleep(step);
        remaining -= step;
    }
    !cancellation.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::ConcurrencyLimiter;
    use crate::engine::RepoContext;
    use std::path::PathBuf;

    fn dummy_engine(name: &str) -> Engine {
        let context = RepoContext {
            repo_url: name.to_string(),
            bare_repo_path: PathBuf::new(),
            worktree_base: PathBuf::new(),
            default_branch_name: String::new(),
            skip_lfs: false,
            update_existing: true,
            branch_max_age: None,
            files_to_copy_on_branch_create: Vec::new(),
            retry: crate::retry::RetryConfig::default(),
        };
        let limiter = ConcurrencyLimiter::new(&crate::concurrency::ParallelismConfig::default()).unwrap();
        let (sink, _receiver) = crate::engine::events::channel();
        Engine::new(context, limiter, sink, CancellationToken::new())
    }

    #[test]
    fn test_is_any_in_progress_false_for_fresh_engines() {
        let supervisor = EngineSupervisor::new(vec![dummy_engine("a"), dummy_engine("b")], 2);
        assert!(!supervisor.is_any_in_progress());
    }

    #[test]
    fn test_wait_for_quiescence_returns_immediately_when_idle() {
        let supervisor = EngineSupervisor::new(vec![dummy_engine("a")], 1);
        assert!(supervisor.wait_for_quiescence(Duration::from_millis(50)));
    }

    #[test]
    fn test_schedule_rejects_out_of_range_index() {
        let supervisor = EngineSupervisor::new(vec![dummy_engine("a")], 1);
        let result = supervisor.schedule(vec![(5, "0 0 * * * *".to_string())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_schedule_rejects_invalid_cron_expression() {
        let supervisor = EngineSupervisor::new(vec![dummy_engine("a")], 1);
        let result = supervisor.schedule(vec![(0, "not a cron expression".to_string())]);
        assert!(result.is_err());
    }
}
