//! Remote branch enumeration and branch-existence/creation operations.

use chrono::{DateTime, Utc};

use super::Repository;
use crate::git::parse::{is_excluded_branch_name, parse_remote_branches_with_activity};

/// A branch as seen on the remote. `last_activity` is `None` from
/// [`Repository::list_remote_branches`] and `Some` from
/// [`Repository::list_remote_branches_with_activity`] — every consumer of
/// the annotated form is also a valid consumer of the bare form, so one
/// type with an optional field covers both operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranch {
    pub name: String,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Result of [`Repository::branch_exists`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchPresence {
    pub local: bool,
    pub remote: bool,
}

impl Repository {
    /// Remote branch names with the `origin/` prefix stripped. Excludes
    /// `HEAD`, `origin`, blanks, and refspec wildcards.
    pub fn list_remote_branches(&self) -> anyhow::Result<Vec<String>> {
        let output = self.run(&[
            "for-each-ref",
            "--format=%(refname:lstrip=3)",
            "refs/remotes/origin/",
        ])?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|name| !is_excluded_branch_name(name))
            .map(str::to_string)
            .collect())
    }

    /// Same as [`Self::list_remote_branches`] but annotated with the
    /// committer date of each branch tip.
    pub fn list_remote_branches_with_activity(&self) -> anyhow::Result<Vec<RemoteBranch>> {
        let output = self.run(&[
            "for-each-ref",
            "--format=%(refname:lstrip=3) %(committerdate:unix)",
            "refs/remotes/origin/",
        ])?;
        Ok(parse_remote_branches_with_activity(&output)
            .into_iter()
            .filter(|(name, _)| !is_excluded_branch_name(name))
            .map(|(name, ts)| RemoteBranch {
                name,
                last_activity: ts.and_then(|t| DateTime::from_timestamp(t, 0)),
            })
            .collect())
    }

    /// Whether `name` exists as a local branch, a remote-tracking branch, or
    /// both.
    pub fn branch_exists(&self, name: &str) -> anyhow::Result<BranchPresence> {
        let local = self.check(&["rev-parse", "--verify", &format!("refs/heads/{name}")])?;
        let remote = self.check(&[
            "rev-parse",
            "--verify",
            &format!("refs/remotes/origin/{name}"),
        ])?;
        Ok(BranchPresence { local, remote })
    }

    /// Create a local branch at `base` (a commit-ish). Used by external
    /// collaborators (e.g. a branch-creation wizard), not by the sync engine
    /// itself.
    pub fn create_branch(&self, name: &str, base: &str) -> anyhow::Result<()> {
        self.run(&["branch", name, base])?;
        Ok(())
    }

    /// Push a local branch to `origin`, setting it as the upstream.
    pub fn push_branch(&self, name: &str) -> anyhow::Result<()> {
        self.run(&["push", "--set-upstream", "origin", name])?;
        Ok(())
    }

    /// Resolve `<branch>@{upstream}`; if it succeeds, confirm the name is
    /// actually still present in `branch -r` (handles the case where the
    /// tracking ref metadata survives but the remote-tracking ref itself was
    /// pruned). If resolution fails with "no upstream"/"ambiguous
    /// argument"/"unknown revision", fall back to the configured upstream in
    /// git config, if any; with none configured, returns `false` (nothing to
    /// be "gone").
    pub fn has_upstream_gone(&self, worktree_path: &std::path::Path) -> anyhow::Result<bool> {
        match self.run_in(worktree_path, &["rev-parse", "--abbrev-ref", "@{upstream}"]) {
            Ok(output) => {
                let upstream = output.trim();
                if upstream.is_empty() {
                    return Ok(false);
                }
                let present = self
                    .run(&["branch", "-r", "--list", upstream])?
                    .lines()
                    .any(|l| l.trim() == upstream);
                Ok(!present)
            }
            Err(err) => {
                let msg = err.to_string();
                if msg.contains("no upstream")
                    || msg.contains("ambiguous argument")
                    || msg.contains("unknown revision")
                {
                    let configured = self.configured_upstream(worktree_path)?;
                    match configured {
                        Some(upstream) => {
                            let present = self
                                .run(&["branch", "-r", "--list", &upstream])?
                                .lines()
                                .any(|l| l.trim() == upstream);
                            Ok(!present)
                        }
                        None => Ok(false),
                    }
                } else {
                    Err(err)
                }
            }
        }
    }

    fn configured_upstream(
        &self,
        worktree_path: &std::path::Path,
    ) -> anyhow::Result<Option<String>> {
        let branch = match self.get_current_branch(worktree_path)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let remote = self
            .run_in(
                worktree_path,
                &["config", "--get", &format!("branch.{branch}.remote")],
            )
            .map(|s| s.trim().to_string())
            .ok();
        let merge_ref = self
            .run_in(
                worktree_path,
                &["config", "--get", &format!("branch.{branch}.merge")],
            )
            .map(|s| s.trim().to_string())
            .ok();
        match (remote, merge_ref) {
            (Some(remote), Some(merge_ref)) => {
                let short = merge_ref.strip_prefix("refs/heads/").unwrap_or(&merge_ref);
                Ok(Some(format!("{remote}/{short}")))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_branch_equality_ignores_nothing_else() {
        let a = RemoteBranch {
            name: "feat/a".into(),
            last_activity: None,
        };
        let b = RemoteBranch {
            name: "feat/a".into(),
            last_activity: None,
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_branch_presence_default_is_absent() {
        let presence = BranchPresence::default();
        assert!(!presence.local);
        assert!(!presence.remote);
    }
}
