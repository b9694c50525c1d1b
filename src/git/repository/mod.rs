//! The Git Facade: a typed wrapper over the `git` binary for one repository
//! backed by a single bare clone shared by every managed worktree.

mod branches;
mod compare;
mod worktrees;

use std::path::{Path, PathBuf};

use dashmap::DashMap;

use super::error::{StderrClass, SyncError, classify_git_stderr};
use crate::shell_exec::Cmd;

pub use branches::{BranchPresence, RemoteBranch};
pub use worktrees::AddWorktreeOutcome;

/// One git repository, represented by its bare clone on disk. Every method
/// shells out via [`Cmd`] and maps non-zero exits to [`SyncError::GitOp`]
/// through [`classify_git_stderr`] so callers downstream (Retry Engine,
/// Phase 4 classification) can react to *kinds* of failure instead of
/// re-matching stderr substrings themselves.
#[derive(Debug)]
pub struct Repository {
    repo_url: String,
    bare_repo_path: PathBuf,
    cache: RepositoryCache,
}

/// Memoized results that are expensive to recompute and safe to share across
/// the lifetime of one sync pass (merge-base is symmetric and depends only
/// on object contents, which don't change mid-pass for a commit we've
/// already resolved).
#[derive(Debug, Default)]
struct RepositoryCache {
    merge_base: DashMap<(String, String), String>,
}

impl Repository {
    pub fn new(repo_url: impl Into<String>, bare_repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_url: repo_url.into(),
            bare_repo_path: bare_repo_path.into(),
            cache: RepositoryCache::default(),
        }
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn bare_repo_path(&self) -> &Path {
        &self.bare_repo_path
    }

    /// Run a git command rooted at the bare repository. Use this for
    /// repo-wide operations (fetch, worktree list/add/remove/prune, branch
    /// enumeration, config). For commands that need a specific worktree's
    /// HEAD/index, use [`Self::run_in`].
    pub(crate) fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        self.run_in(&self.bare_repo_path, args)
    }

    /// Run a git command with `dir` as the working directory. Worktrees
    /// share the bare repo's object store but each has its own HEAD/index,
    /// so operations scoped to one worktree (status, current branch, diff)
    /// must run with that worktree as `cwd`.
    pub(crate) fn run_in(&self, dir: &Path, args: &[&str]) -> anyhow::Result<String> {
        let label = args.join(" ");
        let output = Cmd::new("git")
            .args(args)
            .current_dir(dir)
            .context(&label)
            .run()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(self.classify_failure(&label, &stderr))
        }
    }

    /// Like [`Self::run_in`] but with extra environment variables set on the
    /// child process (used for `GIT_LFS_SKIP_SMUDGE=1`).
    pub(crate) fn run_in_with_env(
        &self,
        dir: &Path,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> anyhow::Result<String> {
        let label = args.join(" ");
        let mut cmd = Cmd::new("git").args(args).current_dir(dir).context(&label);
        for (key, value) in env {
            cmd = cmd.env(key, value);
        }
        let output = cmd.run()?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(self.classify_failure(&label, &stderr))
        }
    }

    /// Like [`Self::run`] but for git invocations where a non-zero exit is
    /// the expected "false" answer (`diff --quiet`, `rev-parse --verify`)
    /// rather than a failure — returns the raw success flag instead of an
    /// error.
    pub(crate) fn check(&self, args: &[&str]) -> anyhow::Result<bool> {
        let output = Cmd::new("git")
            .args(args)
            .current_dir(&self.bare_repo_path)
            .run()?;
        Ok(output.status.success())
    }

    pub(crate) fn check_in(&self, dir: &Path, args: &[&str]) -> anyhow::Result<bool> {
        let output = Cmd::new("git").args(args).current_dir(dir).run()?;
        Ok(output.status.success())
    }

    /// Maps a failed command to `SyncError`. `NotFastForward` is deliberately
    /// left as a plain `GitOp` here — at this layer we only have the raw
    /// argument list, not the branch name the caller is reasoning about.
    /// Callers that care about that distinction (`compare::update_worktree`)
    /// re-classify via [`classify_git_stderr`] themselves and build
    /// `SyncError::FastForwardImpossible` with the branch they already have
    /// in hand.
    fn classify_failure(&self, op: &str, stderr: &str) -> anyhow::Error {
        match classify_git_stderr(stderr) {
            StderrClass::Lfs => SyncError::LfsFailure {
                message: stderr.to_string(),
            }
            .into(),
            _ => SyncError::GitOp {
                op: op.to_string(),
                details: stderr.to_string(),
            }
            .into(),
        }
    }

    pub(crate) fn merge_base_cached(&self, commit1: &str, commit2: &str) -> anyhow::Result<String> {
        let key = if commit1 <= commit2 {
            (commit1.to_string(), commit2.to_string())
        } else {
            (commit2.to_string(), commit1.to_string())
        };
        if let Some(cached) = self.cache.merge_base.get(&key) {
            return Ok(cached.clone());
        }
        let _guard = super::HEAVY_OPS_SEMAPHORE.acquire();
        let result = self
            .run(&["merge-base", commit1, commit2])?
            .trim()
            .to_string();
        self.cache.merge_base.insert(key, result.clone());
        Ok(result)
    }

    /// Ensure `remote.origin.fetch` is the full-mirror refspec this crate
    /// relies on for every other operation (listing, fetching, comparing
    /// remote-tracking refs). Idempotent.
    fn ensure_mirror_fetch_refspec(&self) -> anyhow::Result<()> {
        self.run(&[
            "config",
            "remote.origin.fetch",
            "+refs/heads/*:refs/remotes/origin/*",
        ])?;
        Ok(())
    }

    /// Clone the bare repository if it doesn't already exist, configure the
    /// mirroring fetch refspec, and detect the default branch.
    ///
    /// Detection order: `symbolic-ref refs/remotes/origin/HEAD` (fast, local,
    /// populated by `clone --bare`), falling back to `main`, `master`,
    /// `develop`, `trunk` in that order if the symref is missing (e.g. an
    /// older git or a remote with no default configured).
    pub fn initialize_bare(&self) -> anyhow::Result<String> {
        validate_bare_path(&self.bare_repo_path)?;

        if !self.bare_repo_path.join("HEAD").is_file() {
            if let Some(parent) = self.bare_repo_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let path_str = self
                .bare_repo_path
                .to_str()
                .ok_or_else(|| SyncError::PathResolution {
                    path: self.bare_repo_path.clone(),
                    reason: "bare repo path is not valid UTF-8".into(),
                })?;
            // Set the mirroring refspec at clone time, not after: a plain
            // `clone --bare` lands branches under refs/heads/*, which both
            // starves refs/remotes/origin/HEAD detection below and collides
            // with the refs/heads/<branch> names worktree creation needs.
            Cmd::new("git")
                .args([
                    "clone",
                    "--bare",
                    "--config",
                    "remote.origin.fetch=+refs/heads/*:refs/remotes/origin/*",
                    &self.repo_url,
                    path_str,
                ])
                .run_checked()?;
        }

        self.ensure_mirror_fetch_refspec()?;
        let default_branch = self.detect_default_branch()?;
        self.ensure_default_branch_worktree(&default_branch)?;
        Ok(default_branch)
    }

    /// The default branch lives in its own worktree inside the bare repo
    /// directory itself (`<bareRepo>/<defaultBranch>`), never under
    /// `worktreeBase` — so nothing else ever needs to special-case "the
    /// worktree that happens to be the default branch" among managed
    /// worktrees. A no-op if that worktree is already registered.
    fn ensure_default_branch_worktree(&self, branch: &str) -> anyhow::Result<()> {
        let path = self.bare_repo_path.join(branch);
        if self.worktree_at_path(&path)?.is_some() {
            return Ok(());
        }
        self.add_worktree(branch, &path, false)?;
        Ok(())
    }

    fn detect_default_branch(&self) -> anyhow::Result<String> {
        if let Ok(output) = self.run(&[
            "symbolic-ref",
            "--short",
            "refs/remotes/origin/HEAD",
        ]) {
            if let Ok(name) = super::parse::DefaultBranchName::from_local("origin", &output) {
                return Ok(name.into_string());
            }
        }

        for candidate in ["main", "master", "develop", "trunk"] {
            if self.check(&[
                "rev-parse",
                "--verify",
                &format!("refs/remotes/origin/{candidate}"),
            ])? {
                return Ok(candidate.to_string());
            }
        }

        Err(SyncError::GitOp {
            op: "detect default branch".into(),
            details: "no refs/remotes/origin/HEAD symref and none of main/master/develop/trunk exist".into(),
        }
        .into())
    }

    /// `fetch --all --prune`, falling back to per-branch fetch with
    /// `GIT_LFS_SKIP_SMUDGE=1` if the combined fetch fails on an LFS error.
    pub fn fetch_all(&self, skip_lfs: bool) -> anyhow::Result<()> {
        let mut cmd = Cmd::new("git")
            .args(["fetch", "--all", "--prune"])
            .current_dir(&self.bare_repo_path);
        if skip_lfs {
            cmd = cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        }
        let output = cmd.run()?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if classify_git_stderr(&stderr) != StderrClass::Lfs {
            return Err(self.classify_failure("fetch --all --prune", stderr.trim()));
        }

        log::warn!("fetch --all failed on an LFS error, falling back to per-branch fetch");
        let branches = self.list_remote_branches()?;
        for branch in branches {
            let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
            Cmd::new("git")
                .args(["fetch", "origin", &refspec])
                .current_dir(&self.bare_repo_path)
                .env("GIT_LFS_SKIP_SMUDGE", "1")
                .context(&branch)
                .run_checked()?;
        }
        Ok(())
    }

    pub fn get_current_branch(&self, worktree_path: &Path) -> anyhow::Result<Option<String>> {
        let output = self.run_in(worktree_path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let branch = output.trim();
        if branch.is_empty() || branch == "HEAD" {
            Ok(None)
        } else {
            Ok(Some(branch.to_string()))
        }
    }

    pub fn get_current_commit(&self, worktree_path: &Path) -> anyhow::Result<String> {
        Ok(self
            .run_in(worktree_path, &["rev-parse", "HEAD"])?
            .trim()
            .to_string())
    }

    /// The remote-tracking tip, read from the bare repo for stability (so it
    /// reflects the last `fetch_all`, not whatever a worktree's ref cache
    /// happens to show).
    pub fn get_remote_commit(&self, branch: &str) -> anyhow::Result<String> {
        Ok(self
            .run(&["rev-parse", &format!("refs/remotes/origin/{branch}")])?
            .trim()
            .to_string())
    }
}

/// Rejects empty/whitespace/root bare paths, per the Git Facade contract.
fn validate_bare_path(path: &Path) -> anyhow::Result<()> {
    let as_str = path.to_string_lossy();
    if as_str.trim().is_empty() {
        return Err(SyncError::PathResolution {
            path: path.to_path_buf(),
            reason: "bare repo path is empty or whitespace".into(),
        }
        .into());
    }
    if path == Path::new("/") {
        return Err(SyncError::PathResolution {
            path: path.to_path_buf(),
            reason: "bare repo path must not be the filesystem root".into(),
        }
        .into());
    }
    Ok(())
}
