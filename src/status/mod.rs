//! The Status Probe: everything the Sync Engine needs to know about a single
//! worktree before deciding whether it's safe to touch.

use std::path::{Path, PathBuf};

use crate::git::Repository;

/// Everything Phase 4 classification needs about one worktree's local state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorktreeStatus {
    pub is_clean: bool,
    pub has_unpushed_commits: bool,
    pub has_stashed_changes: bool,
    pub has_operation_in_progress: bool,
    pub has_modified_submodules: bool,
    pub upstream_gone: bool,
    pub can_remove: bool,
    /// Contributing negative predicates, in the fixed order they were
    /// checked — surfaced verbatim in skip/warn log lines.
    pub reasons: Vec<String>,
}

/// File markers under the real git-dir that indicate an in-progress
/// operation this crate must not disturb.
const IN_PROGRESS_MARKERS: &[&str] = &[
    "MERGE_HEAD",
    "CHERRY_PICK_HEAD",
    "REVERT_HEAD",
    "BISECT_LOG",
    "rebase-merge",
    "rebase-apply",
];

impl Repository {
    /// Compute a [`WorktreeStatus`] for `worktree_path`. `last_sync_commit`,
    /// when known, is used for the unpushed-commit count (`lastSyncCommit..
    /// HEAD`) instead of `<branch> --not --remotes`, which gives the wrong
    /// answer once the upstream has been deleted (e.g. after a squash-merge):
    /// counting against the vanished remote would overcount every commit the
    /// branch ever had.
    pub fn worktree_status(
        &self,
        worktree_path: &Path,
        branch: Option<&str>,
        last_sync_commit: Option<&str>,
    ) -> anyhow::Result<WorktreeStatus> {
        let _guard = crate::git::HEAVY_OPS_SEMAPHORE.acquire();

        let mut reasons = Vec::new();

        let is_clean = self.is_worktree_clean(worktree_path)?;
        if !is_clean {
            reasons.push("has uncommitted changes".to_string());
        }

        let detached = self.get_current_branch(worktree_path)?.is_none();

        let has_unpushed_commits = if detached {
            false
        } else {
            self.has_unpushed_commits(worktree_path, branch, last_sync_commit)?
        };
        if has_unpushed_commits {
            reasons.push("has unpushed commits".to_string());
        }

        let has_stashed_changes = self.has_stashed_changes(worktree_path);
        if has_stashed_changes {
            reasons.push("has stashed changes".to_string());
        }

        let has_operation_in_progress = self.has_operation_in_progress(worktree_path)?;
        if has_operation_in_progress {
            reasons.push("has an operation in progress".to_string());
        }

        let has_modified_submodules = self.has_modified_submodules(worktree_path)?;
        if has_modified_submodules {
            reasons.push("has modified submodules".to_string());
        }

        let upstream_gone = match branch {
            Some(_) if !detached => self.has_upstream_gone(worktree_path)?,
            _ => false,
        };

        let can_remove = is_clean
            && !has_unpushed_commits
            && !has_stashed_changes
            && !has_operation_in_progress
            && !has_modified_submodules;

        Ok(WorktreeStatus {
            is_clean,
            has_unpushed_commits,
            has_stashed_changes,
            has_operation_in_progress,
            has_modified_submodules,
            upstream_gone,
            can_remove,
            reasons,
        })
    }

    /// Tracked changes always count; untracked files only count if they
    /// aren't gitignored (a worktree full of gitignored build output is
    /// still "clean" for our purposes).
    fn is_worktree_clean(&self, worktree_path: &Path) -> anyhow::Result<bool> {
        let porcelain = self.run_in(worktree_path, &["status", "--porcelain=v1"])?;
        for line in porcelain.lines() {
            if line.len() < 3 {
                continue;
            }
            let status = &line[0..2];
            let file = line[3..].trim();
            if status.starts_with("??") {
                if !self.check_in(worktree_path, &["check-ignore", "-q", file])? {
                    return Ok(false);
                }
            } else {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn has_unpushed_commits(
        &self,
        worktree_path: &Path,
        branch: Option<&str>,
        last_sync_commit: Option<&str>,
    ) -> anyhow::Result<bool> {
        let range = match last_sync_commit {
            Some(commit) => format!("{commit}..HEAD"),
            None => match branch {
                Some(branch) => {
                    let count = self
                        .run_in(worktree_path, &["rev-list", "--count", branch, "--not", "--remotes"])?;
                    return Ok(count.trim().parse::<u64>().unwrap_or(0) > 0);
                }
                None => return Ok(false),
            },
        };
        let count = self.run_in(worktree_path, &["rev-list", "--count", &range])?;
        Ok(count.trim().parse::<u64>().unwrap_or(0) > 0)
    }

    /// On any error probing the stash, we report "has stash" rather than
    /// propagate — an unreadable stash state must never be read as license
    /// to remove the worktree.
    fn has_stashed_changes(&self, worktree_path: &Path) -> bool {
        match self.run_in(worktree_path, &["stash", "list"]) {
            Ok(output) => !output.trim().is_empty(),
            Err(_) => true,
        }
    }

    fn has_operation_in_progress(&self, worktree_path: &Path) -> anyhow::Result<bool> {
        let git_dir = self.resolve_git_dir(worktree_path)?;
        Ok(IN_PROGRESS_MARKERS
            .iter()
            .any(|marker| git_dir.join(marker).exists()))
    }

    /// `.git` in a worktree is a file (`gitdir: <path>`), not a directory —
    /// resolve it to the real per-worktree metadata directory inside the
    /// bare repo.
    fn resolve_git_dir(&self, worktree_path: &Path) -> anyhow::Result<PathBuf> {
        let dotgit = worktree_path.join(".git");
        if dotgit.is_dir() {
            return Ok(dotgit);
        }
        let contents = std::fs::read_to_string(&dotgit)?;
        let path = contents
            .trim()
            .strip_prefix("gitdir: ")
            .unwrap_or(contents.trim());
        let resolved = PathBuf::from(path);
        if resolved.is_absolute() {
            Ok(resolved)
        } else {
            Ok(worktree_path.join(resolved))
        }
    }

    fn has_modified_submodules(&self, worktree_path: &Path) -> anyhow::Result<bool> {
        let output = match self.run_in(worktree_path, &["submodule", "status"]) {
            Ok(output) => output,
            Err(_) => return Ok(false),
        };
        Ok(output
            .lines()
            .any(|line| line.starts_with('+') || line.starts_with('-')))
    }
}
