//! Worktree creation, removal, and enumeration.

use std::path::{Path, PathBuf};

use normalize_path::NormalizePath;

use super::Repository;
use crate::git::error::{StderrClass, SyncError, classify_git_stderr};
use crate::git::parse::WorktreeInfo;

/// Which path `add_worktree` used to create the local tracking branch, for
/// callers that want to log or record provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddWorktreeOutcome {
    /// A local branch with this name already existed; reused it.
    TrackedExistingLocalBranch,
    /// No local branch existed; created one tracking `origin/<branch>`.
    CreatedTrackingBranch,
}

impl Repository {
    /// All worktrees registered for this repository, with the bare entry
    /// itself filtered out. Entries with no branch (detached HEAD) are kept
    /// in the returned list — callers that only want branch-backed
    /// worktrees filter on `.branch.is_some()` themselves, since some
    /// callers (orphan detection) need the raw path set including detached
    /// ones.
    pub fn list_worktrees(&self) -> anyhow::Result<Vec<WorktreeInfo>> {
        let stdout = self.run(&["worktree", "list", "--porcelain"])?;
        let worktrees = WorktreeInfo::parse_porcelain_list(&stdout)?;
        Ok(worktrees.into_iter().filter(|wt| !wt.bare).collect())
    }

    pub fn worktree_for_branch(&self, branch: &str) -> anyhow::Result<Option<PathBuf>> {
        let worktrees = self.list_worktrees()?;
        Ok(worktrees
            .into_iter()
            .find(|wt| wt.branch.as_deref() == Some(branch))
            .map(|wt| wt.path))
    }

    pub fn worktree_at_path(&self, path: &Path) -> anyhow::Result<Option<WorktreeInfo>> {
        let worktrees = self.list_worktrees()?;
        let normalized = path.normalize();
        Ok(worktrees
            .into_iter()
            .find(|wt| wt.path.normalize() == normalized))
    }

    /// Clear stale registrations left behind by a crashed `worktree add` or
    /// manually deleted directory.
    pub fn prune_worktrees(&self) -> anyhow::Result<()> {
        self.run(&["worktree", "prune"])?;
        Ok(())
    }

    /// Add a worktree for `branch` at `path`. If a local branch already
    /// exists, tracks it directly (`worktree add --track`); otherwise
    /// creates a new local branch tracking `origin/<branch>`. Ensures the
    /// parent directory exists first, since branches with slashes
    /// (`feat/a`) need nested directories.
    ///
    /// Recovers from three failure classes, each retried at most once:
    /// "already registered" (stale registration for a deleted directory) is
    /// cleared with `worktree prune`; "already exists" (an orphaned
    /// directory left at `path` by a crashed previous attempt) is cleared by
    /// removing that directory; an LFS smudge failure is retried with
    /// `GIT_LFS_SKIP_SMUDGE=1`, regardless of the `skip_lfs` the caller
    /// passed in, since the first attempt already tried without it.
    pub fn add_worktree(
        &self,
        branch: &str,
        path: &Path,
        skip_lfs: bool,
    ) -> anyhow::Result<AddWorktreeOutcome> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_str = path.to_str().ok_or_else(|| SyncError::PathResolution {
            path: path.to_path_buf(),
            reason: "worktree path is not valid UTF-8".into(),
        })?;

        let local_exists =
            self.check(&["rev-parse", "--verify", &format!("refs/heads/{branch}")])?;

        let attempt = |repo: &Repository, with_lfs_skip: bool| -> anyhow::Result<AddWorktreeOutcome> {
            let env: &[(&str, &str)] = if with_lfs_skip {
                &[("GIT_LFS_SKIP_SMUDGE", "1")]
            } else {
                &[]
            };
            if local_exists {
                repo.run_in_with_env(
                    repo.bare_repo_path(),
                    &["worktree", "add", "--track", path_str, branch],
                    env,
                )
                .map(|_| AddWorktreeOutcome::TrackedExistingLocalBranch)
            } else {
                repo.run_in_with_env(
                    repo.bare_repo_path(),
                    &[
                        "worktree",
                        "add",
                        "--track",
                        "-b",
                        branch,
                        path_str,
                        &format!("refs/remotes/origin/{branch}"),
                    ],
                    env,
                )
                .map(|_| AddWorktreeOutcome::CreatedTrackingBranch)
            }
        };

        match attempt(self, skip_lfs) {
            Ok(outcome) => Ok(outcome),
            Err(err) => match stderr_class_of(&err) {
                StderrClass::AlreadyRegistered => {
                    log::debug!("add_worktree({branch}): already registered, pruning and retrying");
                    self.prune_worktrees()?;
                    attempt(self, skip_lfs)
                }
                StderrClass::AlreadyExists => {
                    log::debug!("add_worktree({branch}): path already exists, clearing orphan and retrying");
                    if path.exists() {
                        std::fs::remove_dir_all(path)?;
                    }
                    self.prune_worktrees()?;
                    attempt(self, skip_lfs)
                }
                StderrClass::Lfs if !skip_lfs => {
                    log::warn!("add_worktree({branch}): LFS failure, retrying with GIT_LFS_SKIP_SMUDGE=1");
                    attempt(self, true)
                }
                _ => Err(err),
            },
        }
    }

    /// Remove a worktree at `path`. Caller must have already validated
    /// cleanliness via the Status Probe — this always passes `--force` so
    /// removal isn't blocked by untracked build artifacts the probe has
    /// already accounted for.
    pub fn remove_worktree(&self, path: &Path) -> anyhow::Result<()> {
        let path_str = path.to_str().ok_or_else(|| SyncError::PathResolution {
            path: path.to_path_buf(),
            reason: "worktree path is not valid UTF-8".into(),
        })?;
        self.run(&["worktree", "remove", "--force", path_str])?;
        Ok(())
    }
}

fn stderr_class_of(err: &anyhow::Error) -> StderrClass {
    err.downcast_ref::<SyncError>()
        .map(|e| match e {
            SyncError::GitOp { details, .. } => classify_git_stderr(details),
            SyncError::LfsFailure { .. } => StderrClass::Lfs,
            _ => StderrClass::Unrecognized,
        })
        .unwrap_or(StderrClass::Unrecognized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_class_of_non_sync_error_is_unrecognized() {
        let err = anyhow::anyhow!("some other kind of error");
        assert_eq!(stderr_class_of(&err), StderrClass::Unrecognized);
    }

    #[test]
    fn test_stderr_class_of_already_registered() {
        let err: anyhow::Error = SyncError::GitOp {
            op: "worktree add".into(),
            details: "fatal: 'x' is already registered".into(),
        }
        .into();
        assert_eq!(stderr_class_of(&err), StderrClass::AlreadyRegistered);
    }

    #[test]
    fn test_stderr_class_of_lfs_failure_is_lfs() {
        let err: anyhow::Error = SyncError::LfsFailure {
            message: "smudge filter lfs failed".into(),
        }
        .into();
        assert_eq!(stderr_class_of(&err), StderrClass::Lfs);
    }
}
