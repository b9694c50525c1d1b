//! Git layer: a typed facade over the `git` binary, plumbing-output parsers,
//! the error taxonomy, and the concurrency primitive shared across repository
//! operations.

pub mod error;
pub mod parse;
pub mod repository;
pub mod semaphore;

pub use error::{SyncError, classify_git_stderr};
pub use parse::WorktreeInfo;
pub use repository::Repository;
pub use semaphore::Semaphore;

/// Reduces concurrent `rev-list`/`diff` invocations across all [`Repository`]
/// instances so mmap'd pack files and the commit-graph aren't thrashed by
/// many parallel status probes. Distinct from the per-class limiter in
/// `crate::concurrency`, which bounds worktree *mutations*, not read-only
/// history queries.
pub static HEAVY_OPS_SEMAPHORE: std::sync::LazyLock<Semaphore> =
    std::sync::LazyLock::new(|| Semaphore::new(8));
