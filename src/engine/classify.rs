//! Phase 4 classification: the decision tree that turns one existing
//! worktree's status into an action for the executor.

use crate::status::WorktreeStatus;

/// What Phase 4 decided to do with one existing `(path, branch)` worktree.
/// Each variant carries exactly what the executor needs to act — no
/// re-querying status after the decision is made, since status could have
/// changed and the classification would no longer be the one that was
/// logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Branch gone upstream and safe to remove.
    Remove,
    /// Branch gone upstream, but the worktree has unpushed work — never
    /// auto-deleted, surfaced for manual review instead.
    WarnKeep { reasons: Vec<String> },
    /// Branch still present; worktree isn't safe (or isn't useful) to touch
    /// this pass.
    Skip { reasons: Vec<String> },
    /// Fast-forward merge onto the upstream tip.
    Update,
    /// Hard reset onto the upstream tip (clean rebase or content-identical
    /// force-push).
    Reset,
    /// Move the worktree into `.diverged/` and recreate fresh in Phase 5.
    Quarantine,
}

/// Inputs Phase 4 needs for one existing worktree, already gathered in
/// Phase 2/3 and via the Status Probe — kept as a plain struct so the
/// decision function itself stays pure and unit-testable without a live
/// repository.
#[derive(Debug, Clone)]
pub struct ClassifyInput {
    pub branch_is_remote: bool,
    /// True when this branch is the one checked out in the bare repo's own
    /// in-place worktree (the default branch's home) — creating a second
    /// worktree for it would duplicate that checkout.
    pub is_default_branch_worktree: bool,
    pub status: WorktreeStatus,
    pub can_fast_forward: bool,
    pub is_local_ahead_of_remote: bool,
    pub compare_tree_content_identical: bool,
    /// `HEAD == metadata.lastSyncCommit`, when metadata exists. `None` when
    /// there is no metadata record at all — handled conservatively (treated
    /// like "local work exists").
    pub head_matches_last_sync: Option<bool>,
    pub update_existing_worktrees: bool,
    pub worktree_behind: bool,
}

/// Classify one existing `(path, branch)` worktree per §4.F Phase 4.
pub fn classify(input: &ClassifyInput) -> Decision {
    if !input.branch_is_remote {
        if input.status.upstream_gone && input.status.has_unpushed_commits {
            return Decision::WarnKeep {
                reasons: warn_keep_reasons(&input.status),
            };
        }
        if input.status.can_remove {
            return Decision::Remove;
        }
        return Decision::Skip {
            reasons: input.status.reasons.clone(),
        };
    }

    if input.is_default_branch_worktree {
        return Decision::Skip {
            reasons: vec!["branch is checked out as the default-branch worktree".to_string()],
        };
    }

    if input.status.has_operation_in_progress {
        return Decision::Skip {
            reasons: vec!["has an operation in progress".to_string()],
        };
    }

    if !input.can_fast_forward {
        if input.is_local_ahead_of_remote {
            return Decision::Skip {
                reasons: vec!["has unpushed commits, will not overwrite".to_string()],
            };
        }
        if input.compare_tree_content_identical {
            return Decision::Reset;
        }
        return match input.head_matches_last_sync {
            Some(true) => Decision::Reset,
            _ => Decision::Quarantine,
        };
    }

    if input.update_existing_worktrees && input.status.is_clean && input.worktree_behind {
        return Decision::Update;
    }

    Decision::Skip {
        reasons: vec!["up to date".to_string()],
    }
}

fn warn_keep_reasons(status: &WorktreeStatus) -> Vec<String> {
    let mut reasons = vec!["upstream branch is gone".to_string()];
    reasons.extend(status.reasons.iter().cloned());
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> ClassifyInput {
        ClassifyInput {
            branch_is_remote: true,
            is_default_branch_worktree: false,
            status: WorktreeStatus {
                is_clean: true,
                ..WorktreeStatus::default()
            },
            can_fast_forward: true,
            is_local_ahead_of_remote: false,
            compare_tree_content_identical: false,
            head_matches_last_sync: Some(true),
            update_existing_worktrees: true,
            worktree_behind: false,
        }
    }

    #[test]
    fn test_s2_branch_gone_clean_is_removed() {
        let input = ClassifyInput {
            branch_is_remote: false,
            status: WorktreeStatus {
                is_clean: true,
                can_remove: true,
                ..WorktreeStatus::default()
            },
            ..base_input()
        };
        assert_eq!(classify(&input), Decision::Remove);
    }

    #[test]
    fn test_s3_branch_gone_upstream_gone_with_unpushed_is_warn_keep() {
        let input = ClassifyInput {
            branch_is_remote: false,
            status: WorktreeStatus {
                upstream_gone: true,
                has_unpushed_commits: true,
                reasons: vec!["has unpushed commits".to_string()],
                ..WorktreeStatus::default()
            },
            ..base_input()
        };
        assert!(matches!(classify(&input), Decision::WarnKeep { .. }));
    }

    #[test]
    fn test_branch_gone_not_removable_and_not_warn_keep_is_skip() {
        let input = ClassifyInput {
            branch_is_remote: false,
            status: WorktreeStatus {
                upstream_gone: false,
                has_stashed_changes: true,
                reasons: vec!["has stashed changes".to_string()],
                ..WorktreeStatus::default()
            },
            ..base_input()
        };
        assert!(matches!(classify(&input), Decision::Skip { .. }));
    }

    #[test]
    fn test_default_branch_worktree_is_always_skipped() {
        let input = ClassifyInput {
            is_default_branch_worktree: true,
            ..base_input()
        };
        assert!(matches!(classify(&input), Decision::Skip { .. }));
    }

    #[test]
    fn test_operation_in_progress_is_skipped() {
        let input = ClassifyInput {
            status: WorktreeStatus {
                has_operation_in_progress: true,
                ..WorktreeStatus::default()
            },
            ..base_input()
        };
        assert!(matches!(classify(&input), Decision::Skip { .. }));
    }

    #[test]
    fn test_s6_ahead_only_is_skipped_not_quarantined() {
        let input = ClassifyInput {
            can_fast_forward: false,
            is_local_ahead_of_remote: true,
            ..base_input()
        };
        assert!(matches!(classify(&input), Decision::Skip { .. }));
    }

    #[test]
    fn test_s4_identical_tree_rebase_is_reset() {
        let input = ClassifyInput {
            can_fast_forward: false,
            is_local_ahead_of_remote: false,
            compare_tree_content_identical: true,
            ..base_input()
        };
        assert_eq!(classify(&input), Decision::Reset);
    }

    #[test]
    fn test_head_matches_last_sync_with_differing_tree_is_reset() {
        let input = ClassifyInput {
            can_fast_forward: false,
            is_local_ahead_of_remote: false,
            compare_tree_content_identical: false,
            head_matches_last_sync: Some(true),
            ..base_input()
        };
        assert_eq!(classify(&input), Decision::Reset);
    }

    #[test]
    fn test_s5_diverged_real_work_is_quarantined() {
        let input = ClassifyInput {
            can_fast_forward: false,
            is_local_ahead_of_remote: false,
            compare_tree_content_identical: false,
            head_matches_last_sync: Some(false),
            ..base_input()
        };
        assert_eq!(classify(&input), Decision::Quarantine);
    }

    #[test]
    fn test_missing_metadata_conservatively_quarantines() {
        let input = ClassifyInput {
            can_fast_forward: false,
            is_local_ahead_of_remote: false,
            compare_tree_content_identical: false,
            head_matches_last_sync: None,
            ..base_input()
        };
        assert_eq!(classify(&input), Decision::Quarantine);
    }

    #[test]
    fn test_update_existing_behind_and_clean_is_update() {
        let input = ClassifyInput {
            can_fast_forward: true,
            worktree_behind: true,
            ..base_input()
        };
        assert_eq!(classify(&input), Decision::Update);
    }

    #[test]
    fn test_update_existing_disabled_is_skip() {
        let input = ClassifyInput {
            can_fast_forward: true,
            worktree_behind: true,
            update_existing_worktrees: false,
            ..base_input()
        };
        assert!(matches!(classify(&input), Decision::Skip { .. }));
    }

    #[test]
    fn test_up_to_date_is_skip() {
        let input = ClassifyInput {
            can_fast_forward: true,
            worktree_behind: false,
            ..base_input()
        };
        assert!(matches!(classify(&input), Decision::Skip { .. }));
    }
}
