//! Exercises the Git Facade directly against a real bare clone, covering the
//! fresh-clone path (spec.md §8 S1) that the rest of the engine depends on:
//! default-branch detection and worktree creation both need
//! `refs/remotes/origin/*` populated immediately after `initialize_bare`,
//! before any later fetch runs.

mod common;

use common::OriginRepo;
use wtsync::git::Repository;

#[test]
fn initialize_bare_populates_remote_tracking_refs_before_any_fetch() {
    let origin = OriginRepo::new();
    let bare_parent = tempfile::tempdir().unwrap();
    let bare_path = bare_parent.path().join("bare.git");

    let repo = Repository::new(origin.url(), bare_path.clone());
    let default_branch = repo.initialize_bare().unwrap();
    assert_eq!(default_branch, "main");

    // refs/remotes/origin/main must exist right after clone, with no fetch
    // in between -- a plain `clone --bare` alone would leave branches under
    // refs/heads/* instead.
    assert!(
        bare_path.join("refs/remotes/origin/main").is_file()
            || repo.branch_exists("main").map(|p| p.remote).unwrap_or(false),
        "expected refs/remotes/origin/main to exist immediately after initialize_bare"
    );
}

#[test]
fn initialize_bare_leaves_refs_heads_free_for_worktree_branches() {
    let origin = OriginRepo::new();
    origin.commit_on_branch("feat/a", "main", "a.txt", "hello");

    let bare_parent = tempfile::tempdir().unwrap();
    let repo = Repository::new(origin.url(), bare_parent.path().join("bare.git"));
    repo.initialize_bare().unwrap();

    // Creating a local tracking branch for "feat/a" must not collide with a
    // same-named ref left behind by the initial clone.
    let worktree_dir = tempfile::tempdir().unwrap();
    let outcome = repo
        .add_worktree("feat/a", &worktree_dir.path().join("feat-a"), false)
        .unwrap();
    assert_eq!(
        outcome,
        wtsync::git::repository::AddWorktreeOutcome::CreatedTrackingBranch
    );
}

#[test]
fn initialize_bare_is_idempotent() {
    let origin = OriginRepo::new();
    let bare_parent = tempfile::tempdir().unwrap();
    let bare_path = bare_parent.path().join("bare.git");

    let repo = Repository::new(origin.url(), bare_path);
    let first = repo.initialize_bare().unwrap();
    let second = repo.initialize_bare().unwrap();
    assert_eq!(first, second);
}

#[test]
fn fetch_all_picks_up_new_remote_branches() {
    let origin = OriginRepo::new();
    let bare_parent = tempfile::tempdir().unwrap();
    let repo = Repository::new(origin.url(), bare_parent.path().join("bare.git"));
    repo.initialize_bare().unwrap();
    assert!(!repo.list_remote_branches().unwrap().contains(&"feat/a".to_string()));

    origin.commit_on_branch("feat/a", "main", "a.txt", "hello");
    repo.fetch_all(false).unwrap();

    assert!(repo.list_remote_branches().unwrap().contains(&"feat/a".to_string()));
}
