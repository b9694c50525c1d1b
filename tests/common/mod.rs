//! Shared fixtures for building a real origin + bare-mirror repository pair
//! on disk. Every scenario in `spec.md` §8 starts from "a bare clone with a
//! remote", so every integration test needs one of these.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use wtsync::concurrency::{ConcurrencyLimiter, ParallelismConfig};
use wtsync::engine::{CancellationToken, Engine, RepoContext};
use wtsync::retry::RetryConfig;

fn git(dir: &Path, args: &[&str]) -> Output {
    Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_CONFIG_SYSTEM", "/dev/null")
        .env("GIT_AUTHOR_NAME", "wtsync-test")
        .env("GIT_AUTHOR_EMAIL", "wtsync-test@example.invalid")
        .env("GIT_COMMITTER_NAME", "wtsync-test")
        .env("GIT_COMMITTER_EMAIL", "wtsync-test@example.invalid")
        .output()
        .expect("failed to spawn git")
}

fn git_ok(dir: &Path, args: &[&str]) -> Output {
    let output = git(dir, args);
    assert!(
        output.status.success(),
        "git {args:?} in {} failed: {}",
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stdout_trimmed(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare "remote" repository plus a throwaway developer checkout used to
/// advance it. Tests never commit into the bare repo directly.
pub struct OriginRepo {
    bare: tempfile::TempDir,
    checkout: tempfile::TempDir,
}

impl OriginRepo {
    /// Seeds a bare repo with one commit on `main`.
    pub fn new() -> Self {
        let bare = tempfile::tempdir().unwrap();
        git_ok(bare.path(), &["init", "--bare", "--initial-branch", "main"]);

        let checkout = tempfile::tempdir().unwrap();
        git_ok(checkout.path(), &["init", "--initial-branch", "main"]);
        git_ok(
            checkout.path(),
            &["remote", "add", "origin", &bare.path().to_string_lossy()],
        );
        std::fs::write(checkout.path().join("README.md"), "seed\n").unwrap();
        git_ok(checkout.path(), &["add", "README.md"]);
        git_ok(checkout.path(), &["commit", "-m", "seed"]);
        git_ok(checkout.path(), &["push", "origin", "main"]);

        Self { bare, checkout }
    }

    pub fn url(&self) -> String {
        self.bare.path().to_string_lossy().into_owned()
    }

    /// Creates (or advances) `branch` in the developer checkout from `base`,
    /// writes `contents` to `file`, commits, and pushes. Returns the new
    /// commit hash.
    pub fn commit_on_branch(&self, branch: &str, base: &str, file: &str, contents: &str) -> String {
        let dir = self.checkout.path();
        if git(dir, &["rev-parse", "--verify", branch]).status.success() {
            git_ok(dir, &["checkout", branch]);
        } else {
            git_ok(dir, &["checkout", "-b", branch, base]);
        }
        std::fs::write(dir.join(file), contents).unwrap();
        git_ok(dir, &["add", file]);
        git_ok(dir, &["commit", "-m", format!("update {file}")]);
        git_ok(dir, &["push", "-u", "origin", branch]);
        stdout_trimmed(&git(dir, &["rev-parse", "HEAD"]))
    }

    /// Deletes `branch` from the remote only; any local worktree wtsync made
    /// for it is left exactly as it was (what S2/S3 start from).
    pub fn delete_remote_branch(&self, branch: &str) {
        git_ok(self.checkout.path(), &["push", "origin", "--delete", branch]);
    }

    /// Rewrites `branch`'s tip to a new commit with identical tree content
    /// (an amend) and force-pushes — the "rebased without content changes"
    /// shape S4 needs. Returns the new commit hash.
    pub fn rewrite_tip_same_tree(&self, branch: &str) -> String {
        let dir = self.checkout.path();
        git_ok(dir, &["checkout", branch]);
        git_ok(dir, &["commit", "--amend", "--no-edit", "--allow-empty"]);
        git_ok(dir, &["push", "--force", "origin", branch]);
        stdout_trimmed(&git(dir, &["rev-parse", "HEAD"]))
    }

    /// Advances `branch` on the remote with a genuinely new commit (real
    /// content change), without touching any existing local worktree. Used
    /// together with a local-only commit in the worktree to build a true
    /// divergence (S5).
    pub fn advance_branch(&self, branch: &str, file: &str, contents: &str) -> String {
        self.commit_on_branch(branch, branch, file, contents)
    }
}

/// Commits a file directly inside an already-created worktree, without
/// pushing — simulates a developer's uncommitted-turned-committed local work
/// that wtsync must not silently discard (S3, S5, S6).
pub fn commit_in_worktree(worktree_path: &Path, file: &str, contents: &str) -> String {
    std::fs::write(worktree_path.join(file), contents).unwrap();
    git_ok(worktree_path, &["add", file]);
    git_ok(worktree_path, &["commit", "-m", format!("local work on {file}")]);
    stdout_trimmed(&git(worktree_path, &["rev-parse", "HEAD"]))
}

pub fn worktree_exists(worktree_base: &Path, branch: &str) -> bool {
    worktree_base.join(branch).join(".git").exists()
}

/// A ready-to-sync engine over a fresh bare clone of `origin`, with its own
/// `worktreeBase` directory. Each call creates new temp directories so tests
/// don't share state.
pub struct TestEngine {
    pub engine: Engine,
    pub worktree_base: tempfile::TempDir,
    _bare_parent: tempfile::TempDir,
}

impl TestEngine {
    pub fn new(origin: &OriginRepo) -> Self {
        let bare_parent = tempfile::tempdir().unwrap();
        let worktree_base = tempfile::tempdir().unwrap();

        let context = RepoContext {
            repo_url: origin.url(),
            bare_repo_path: bare_parent.path().join("bare.git"),
            worktree_base: worktree_base.path().to_path_buf(),
            default_branch_name: String::new(),
            skip_lfs: false,
            update_existing: true,
            branch_max_age: None,
            files_to_copy_on_branch_create: Vec::new(),
            retry: RetryConfig::default(),
        };

        let limiter = ConcurrencyLimiter::new(&ParallelismConfig::default()).unwrap();
        let (sink, _receiver) = wtsync::engine::events::channel();
        let mut engine = Engine::new(context, limiter, sink, CancellationToken::new());
        engine.initialize().expect("engine initialization failed");

        Self {
            engine,
            worktree_base,
            _bare_parent: bare_parent,
        }
    }

    pub fn worktree_path(&self, branch: &str) -> PathBuf {
        self.worktree_base.path().join(branch)
    }

    pub fn diverged_dir(&self) -> PathBuf {
        self.worktree_base.path().join(".diverged")
    }
}
