//! Ahead/behind and fast-forward comparisons between a worktree's `HEAD` and
//! its `origin/<branch>` tracking ref, and the two operations that act on the
//! result (`reset_to_upstream`, `update_worktree`).

use std::path::Path;

use crate::git::error::{StderrClass, SyncError, classify_git_stderr};

use super::Repository;

impl Repository {
    /// True iff `HEAD` is an ancestor of (or equal to) `origin/<branch>` —
    /// i.e. a `merge --ff-only` would succeed without discarding any local
    /// commit.
    pub fn can_fast_forward(&self, worktree_path: &Path, branch: &str) -> anyhow::Result<bool> {
        let head = self.get_current_commit(worktree_path)?;
        let upstream = self.get_remote_commit(branch)?;
        if head == upstream {
            return Ok(true);
        }
        let base = self.merge_base_cached(&head, &upstream)?;
        Ok(base == head)
    }

    /// True iff local `HEAD` strictly descends `origin/<branch>` — local has
    /// commits upstream doesn't, so fetching further wouldn't change
    /// anything and a push (not a reset) is what's called for.
    pub fn is_local_ahead_of_remote(
        &self,
        worktree_path: &Path,
        branch: &str,
    ) -> anyhow::Result<bool> {
        let head = self.get_current_commit(worktree_path)?;
        let upstream = self.get_remote_commit(branch)?;
        if head == upstream {
            return Ok(false);
        }
        let base = self.merge_base_cached(&head, &upstream)?;
        Ok(base == upstream)
    }

    /// True iff the working tree contents at `HEAD` and at `origin/<branch>`
    /// are identical, even when the commit graphs have diverged (a rebase or
    /// amend that reproduced the same tree). Used to downgrade what would
    /// otherwise be a quarantine into a quiet reset, since there's no content
    /// to lose.
    pub fn compare_tree_content(&self, worktree_path: &Path, branch: &str) -> anyhow::Result<bool> {
        let local_tree = self.run_in(worktree_path, &["rev-parse", "HEAD^{tree}"])?;
        let remote_tree = self.run(&[
            "rev-parse",
            &format!("refs/remotes/origin/{branch}^{{tree}}"),
        ])?;
        Ok(local_tree.trim() == remote_tree.trim())
    }

    /// Hard-reset the worktree at `path` to `origin/<branch>`, discarding any
    /// local commits and working-tree changes. Callers must have already
    /// confirmed (via the Status Probe and, in the quarantine path, a
    /// successful move of the old directory out of the way) that nothing of
    /// value is being discarded.
    pub fn reset_to_upstream(&self, worktree_path: &Path, branch: &str) -> anyhow::Result<()> {
        self.run_in(
            worktree_path,
            &["reset", "--hard", &format!("origin/{branch}")],
        )?;
        Ok(())
    }

    /// Fast-forward the worktree at `path` to `origin/<branch>`. Errors with
    /// [`SyncError::FastForwardImpossible`] if the merge isn't a pure
    /// fast-forward — callers are expected to have already checked
    /// [`Self::can_fast_forward`] and only reach here on the happy path, but
    /// the check is re-asserted here too since the remote-tracking ref can
    /// move between the two calls under concurrent fetches.
    pub fn update_worktree(&self, worktree_path: &Path, branch: &str, skip_lfs: bool) -> anyhow::Result<()> {
        let upstream_arg = format!("origin/{branch}");
        let args = ["merge", "--ff-only", upstream_arg.as_str()];

        let env: &[(&str, &str)] = if skip_lfs {
            &[("GIT_LFS_SKIP_SMUDGE", "1")]
        } else {
            &[]
        };

        match self.run_in_with_env(worktree_path, &args, env) {
            Ok(_) => Ok(()),
            Err(err) => {
                let details = err.to_string();
                if classify_git_stderr(&details) == StderrClass::NotFastForward {
                    Err(SyncError::FastForwardImpossible {
                        branch: branch.to_string(),
                    }
                    .into())
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_new_has_empty_merge_base_cache() {
        let repo = Repository::new("https://example.com/repo.git", "/tmp/repo.bare");
        assert_eq!(repo.bare_repo_path().to_str().unwrap(), "/tmp/repo.bare");
        assert_eq!(repo.repo_url(), "https://example.com/repo.git");
    }
}
