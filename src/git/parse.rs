//! Parsers for `git` plumbing/porcelain output.
//!
//! Kept separate from `repository/` so the parsing logic — the part most
//! worth unit-testing in isolation — doesn't need a live git process.

use std::path::PathBuf;

use super::error::SyncError;

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub head: String,
    pub branch: Option<String>,
    pub bare: bool,
    pub detached: bool,
    pub locked: Option<String>,
    pub prunable: Option<String>,
}

impl WorktreeInfo {
    pub(crate) fn parse_porcelain_list(output: &str) -> anyhow::Result<Vec<Self>> {
        let mut worktrees = Vec::new();
        let mut current: Option<WorktreeInfo> = None;

        for line in output.lines() {
            if line.is_empty() {
                if let Some(wt) = current.take() {
                    worktrees.push(wt);
                }
                continue;
            }

            let (key, value) = match line.split_once(' ') {
                Some((k, v)) => (k, Some(v)),
                None => (line, None),
            };

            match key {
                "worktree" => {
                    let Some(path) = value else {
                        return Err(SyncError::GitOp {
                            op: "worktree list --porcelain".into(),
                            details: "worktree line missing path".into(),
                        }
                        .into());
                    };
                    current = Some(WorktreeInfo {
                        path: PathBuf::from(path),
                        head: String::new(),
                        branch: None,
                        bare: false,
                        detached: false,
                        locked: None,
                        prunable: None,
                    });
                }
                key => match (key, current.as_mut()) {
                    ("HEAD", Some(wt)) => {
                        let Some(sha) = value else {
                            return Err(SyncError::GitOp {
                                op: "worktree list --porcelain".into(),
                                details: "HEAD line missing SHA".into(),
                            }
                            .into());
                        };
                        wt.head = sha.to_string();
                    }
                    ("branch", Some(wt)) => {
                        let Some(branch_ref) = value else {
                            return Err(SyncError::GitOp {
                                op: "worktree list --porcelain".into(),
                                details: "branch line missing ref".into(),
                            }
                            .into());
                        };
                        wt.branch = Some(
                            branch_ref
                                .strip_prefix("refs/heads/")
                                .unwrap_or(branch_ref)
                                .to_string(),
                        );
                    }
                    ("bare", Some(wt)) => wt.bare = true,
                    ("detached", Some(wt)) => wt.detached = true,
                    ("locked", Some(wt)) => wt.locked = Some(value.unwrap_or_default().to_string()),
                    ("prunable", Some(wt)) => {
                        wt.prunable = Some(value.unwrap_or_default().to_string())
                    }
                    _ => {}
                },
            }
        }

        if let Some(wt) = current {
            worktrees.push(wt);
        }

        Ok(worktrees)
    }
}

/// Result of `git ls-remote --symref origin HEAD` / `symbolic-ref
/// refs/remotes/origin/HEAD`, used to discover the default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultBranchName(String);

impl DefaultBranchName {
    /// Parse from `git symbolic-ref --short refs/remotes/<remote>/HEAD`
    /// output, which looks like `<remote>/<branch>`.
    pub fn from_local(remote: &str, output: &str) -> anyhow::Result<Self> {
        let trimmed = output.trim();
        let prefix = format!("{remote}/");
        let branch = trimmed.strip_prefix(&prefix).unwrap_or(trimmed);

        if branch.is_empty() {
            return Err(SyncError::GitOp {
                op: "symbolic-ref".into(),
                details: format!("empty branch name from {remote}/HEAD"),
            }
            .into());
        }

        Ok(Self(branch.to_string()))
    }

    /// Parse from `git ls-remote --symref <url> HEAD` output:
    /// `ref: refs/heads/<branch>\tHEAD`.
    pub fn from_remote(output: &str) -> anyhow::Result<Self> {
        output
            .lines()
            .find_map(|line| {
                line.strip_prefix("ref: ")
                    .and_then(|symref| symref.split_once('\t'))
                    .map(|(ref_path, _)| ref_path)
                    .and_then(|ref_path| ref_path.strip_prefix("refs/heads/"))
                    .map(str::to_string)
            })
            .map(Self)
            .ok_or_else(|| {
                SyncError::GitOp {
                    op: "ls-remote --symref".into(),
                    details: "could not find symbolic ref in output".into(),
                }
                .into()
            })
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One entry from `git for-each-ref --format='%(refname:lstrip=3) %(committerdate:unix)'
/// refs/remotes/origin/`, used by `listRemoteBranchesWithActivity`.
pub fn parse_remote_branches_with_activity(
    output: &str,
) -> Vec<(String, Option<i64>)> {
    output
        .lines()
        .filter_map(|line| {
            let (name, ts) = line.split_once(' ')?;
            if name.is_empty() {
                return None;
            }
            let timestamp = ts.trim().parse::<i64>().ok();
            Some((name.to_string(), timestamp))
        })
        .collect()
}

/// Names that must never be treated as a real remote branch: `HEAD`,
/// `origin` itself, blanks, and refspec wildcards.
pub fn is_excluded_branch_name(name: &str) -> bool {
    name.is_empty() || name == "HEAD" || name == "origin" || name.contains('*')
}
