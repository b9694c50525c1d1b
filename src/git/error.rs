//! Typed error taxonomy for git and sync operations.
//!
//! Mirrors the split used throughout this crate's git layer: a `thiserror`
//! enum (`SyncError`) for domain errors that can be pattern-matched and
//! tested, plus free functions (`is_sync_error`, `is_fast_forward_impossible`,
//! ...) for downcast-based matching once the error has crossed an
//! `anyhow::Result` boundary via `.into()`.
//!
//! `classify_git_stderr` is the single table that turns raw git stderr into
//! one of these variants. Every caller that needs to recognize a particular
//! git failure (the Retry Engine's default predicate, Phase 4/5 divergence
//! handling) goes through this function rather than re-matching substrings
//! itself.

use std::path::PathBuf;

/// Domain errors for git and worktree-sync operations.
///
/// Each variant carries the data needed to act on it (retry, skip, abort)
/// without re-parsing a message string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Engine method called before `initialize()`.
    #[error("sync engine used before initialize()")]
    GitNotInitialized,

    /// A git subprocess exited non-zero; `op` labels what we were trying to do.
    #[error("git {op} failed: {details}")]
    GitOp { op: String, details: String },

    /// Recognized by stderr patterns (non-fast-forward, rejected push).
    /// Never fatal — triggers the Phase 4 divergence handling.
    #[error("fast-forward not possible for branch '{branch}'")]
    FastForwardImpossible { branch: String },

    /// Git-LFS smudge/filter failure. Retried under a separate, smaller
    /// budget (`maxLfsRetries`); terminal failure recommends `skipLfs`.
    #[error("git-lfs operation failed: {message}")]
    LfsFailure { message: String },

    /// `<branch>@{upstream}` failed to resolve and no upstream is configured
    /// in git config either. Not an error condition by itself — callers
    /// proceed as if there is simply no upstream.
    #[error("no upstream configured for '{branch}'")]
    NoUpstreamConfigured { branch: String },

    /// Worktree has uncommitted changes, stashes, an in-progress operation,
    /// or modified submodules; surfaces as a skip, never fatal.
    #[error("worktree at {} is not clean: {}", path.display(), reasons.join(", "))]
    WorktreeNotClean {
        path: PathBuf,
        reasons: Vec<String>,
    },

    /// `worktree add` reported the path already exists or is already
    /// registered. Triggers orphan cleanup + prune + retry-once.
    #[error("worktree already exists for branch '{branch}' at {}", path.display())]
    WorktreeAlreadyExists { branch: String, path: PathBuf },

    /// Invalid bare repo path (empty, whitespace, root `/`, or outside the
    /// configured base). Fatal at initialization.
    #[error("invalid path: {reason}")]
    PathResolution { path: PathBuf, reason: String },

    /// Config failed to load or validate. Fatal before any sync.
    #[error("invalid configuration for '{field}': {reason}")]
    ConfigValidation { field: String, reason: String },
}

/// Check if an error downcasts to `SyncError` and satisfies a predicate.
pub fn is_sync_error<F>(err: &anyhow::Error, predicate: F) -> bool
where
    F: FnOnce(&SyncError) -> bool,
{
    err.downcast_ref::<SyncError>().is_some_and(predicate)
}

pub fn is_fast_forward_impossible(err: &anyhow::Error) -> bool {
    is_sync_error(err, |e| matches!(e, SyncError::FastForwardImpossible { .. }))
}

pub fn is_lfs_failure(err: &anyhow::Error) -> bool {
    is_sync_error(err, |e| matches!(e, SyncError::LfsFailure { .. }))
}

pub fn is_worktree_already_exists(err: &anyhow::Error) -> bool {
    is_sync_error(err, |e| matches!(e, SyncError::WorktreeAlreadyExists { .. }))
}

pub fn is_git_not_initialized(err: &anyhow::Error) -> bool {
    is_sync_error(err, |e| matches!(e, SyncError::GitNotInitialized))
}

/// Recognized git/network/filesystem failure classes, used by the Retry
/// Engine's default `shouldRetry` predicate. `Lfs` is counted against the
/// separate, smaller `maxLfsRetries` budget instead of the general one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum StderrClass {
    Network,
    Filesystem,
    Lfs,
    AlreadyRegistered,
    AlreadyExists,
    NotFastForward,
    NoUpstream,
    Unrecognized,
}

/// Classify raw git stderr into one of the patterns this crate knows how to
/// react to. This is the single table referenced by the Retry Engine and by
/// Phase 4/5 divergence handling — new patterns get added here, nowhere else.
pub fn classify_git_stderr(stderr: &str) -> StderrClass {
    const NETWORK_PATTERNS: &[&str] = &[
        "ENOTFOUND",
        "ECONNREFUSED",
        "ETIMEDOUT",
        "Could not read from remote repository",
        "fatal: unable to access",
        "Connection timed out",
        "Connection refused",
    ];
    const FILESYSTEM_PATTERNS: &[&str] = &["EBUSY", "ENOENT", "EACCES"];
    const LFS_PATTERNS: &[&str] = &[
        "smudge filter lfs failed",
        "Object does not exist on the server",
        "external filter 'git-lfs filter-process' failed",
    ];

    if LFS_PATTERNS.iter().any(|p| stderr.contains(p)) {
        return StderrClass::Lfs;
    }
    if stderr.contains("already registered") {
        return StderrClass::AlreadyRegistered;
    }
    if stderr.contains("already exists") {
        return StderrClass::AlreadyExists;
    }
    if stderr.contains("non-fast-forward") || stderr.contains("not possible to fast-forward") {
        return StderrClass::NotFastForward;
    }
    if stderr.contains("no upstream")
        || stderr.contains("ambiguous argument")
        || stderr.contains("unknown revision")
    {
        return StderrClass::NoUpstream;
    }
    if NETWORK_PATTERNS.iter().any(|p| stderr.contains(p)) {
        return StderrClass::Network;
    }
    if FILESYSTEM_PATTERNS.iter().any(|p| stderr.contains(p)) {
        return StderrClass::Filesystem;
    }
    StderrClass::Unrecognized
}

/// Default retryability predicate for the Retry Engine: network and
/// filesystem classes are retryable under the general budget; LFS is
/// retryable but tracked separately by the caller; everything else is not.
pub fn is_retryable_class(class: StderrClass) -> bool {
    matches!(
        class,
        StderrClass::Network | StderrClass::Filesystem | StderrClass::Lfs
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_display_plain() {
        let err = SyncError::FastForwardImpossible {
            branch: "feature".into(),
        };
        assert_eq!(
            err.to_string(),
            "fast-forward not possible for branch 'feature'"
        );
    }

    #[test]
    fn test_into_preserves_type_for_downcast() {
        let err: anyhow::Error = SyncError::LfsFailure {
            message: "smudge failed".into(),
        }
        .into();
        assert!(is_lfs_failure(&err));
        assert!(!is_fast_forward_impossible(&err));
    }

    #[test]
    fn test_classify_lfs_patterns() {
        assert_eq!(
            classify_git_stderr("error: external filter 'git-lfs filter-process' failed"),
            StderrClass::Lfs
        );
        assert_eq!(
            classify_git_stderr("batch response: Object does not exist on the server"),
            StderrClass::Lfs
        );
    }

    #[test]
    fn test_classify_network_patterns() {
        assert_eq!(
            classify_git_stderr("fatal: unable to access 'https://example.com/': Could not resolve host"),
            StderrClass::Network
        );
        assert_eq!(
            classify_git_stderr("fatal: Could not read from remote repository."),
            StderrClass::Network
        );
    }

    #[test]
    fn test_classify_already_registered_vs_exists() {
        assert_eq!(
            classify_git_stderr("fatal: 'path' is already registered"),
            StderrClass::AlreadyRegistered
        );
        assert_eq!(
            classify_git_stderr("fatal: destination path 'x' already exists"),
            StderrClass::AlreadyExists
        );
    }

    #[test]
    fn test_classify_no_upstream() {
        assert_eq!(
            classify_git_stderr("fatal: no upstream configured for branch 'feature'"),
            StderrClass::NoUpstream
        );
        assert_eq!(
            classify_git_stderr("fatal: ambiguous argument 'feature@{upstream}'"),
            StderrClass::NoUpstream
        );
    }

    #[test]
    fn test_classify_unrecognized_defaults_to_not_retryable() {
        let class = classify_git_stderr("fatal: some completely novel error message");
        assert_eq!(class, StderrClass::Unrecognized);
        assert!(!is_retryable_class(class));
    }

    #[test]
    fn test_retryable_classes() {
        assert!(is_retryable_class(StderrClass::Network));
        assert!(is_retryable_class(StderrClass::Filesystem));
        assert!(is_retryable_class(StderrClass::Lfs));
        assert!(!is_retryable_class(StderrClass::NotFastForward));
        assert!(!is_retryable_class(StderrClass::AlreadyExists));
    }

    #[test]
    fn test_worktree_not_clean_message_lists_reasons() {
        let err = SyncError::WorktreeNotClean {
            path: PathBuf::from("/repo/worktrees/feature"),
            reasons: vec!["has unpushed commits".into(), "has stash".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("has unpushed commits"));
        assert!(msg.contains("has stash"));
    }
}
