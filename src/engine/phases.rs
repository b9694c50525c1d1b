//! Phases 0 through 6 of one sync pass (§4.F), called in order from
//! [`super::Engine::run_pass`]. Each phase function takes the engine and
//! whatever the previous phase produced, and returns a [`PhaseTiming`] for
//! the performance summary plus (for phases 2 and 4) the data the next phase
//! needs.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::Rng;
use rayon::prelude::*;

use super::classify::{self, ClassifyInput, Decision};
use super::events::{self, LogLevel};
use super::timing::{PhaseName, PhaseStopwatch, PhaseTiming};
use super::Engine;
use crate::concurrency::Class;
use crate::git::repository::RemoteBranch;
use crate::metadata::SyncAction;
use crate::retry;

pub(crate) fn phase0_prune(engine: &Engine) -> anyhow::Result<PhaseTiming> {
    events::emit_phase_start(engine.events(), PhaseName::Prune);
    let stopwatch = PhaseStopwatch::start(PhaseName::Prune);
    engine.repository().prune_worktrees()?;
    let timing = stopwatch.finish(1);
    events::emit_phase_end(engine.events(), &timing);
    Ok(timing)
}

pub(crate) fn phase1_fetch(engine: &Engine) -> anyhow::Result<PhaseTiming> {
    events::emit_phase_start(engine.events(), PhaseName::Fetch);
    let stopwatch = PhaseStopwatch::start(PhaseName::Fetch);
    events::emit_log(engine.events(), LogLevel::Info, "fetching from origin");

    let skip_lfs = engine.context.skip_lfs;
    retry::run_with_retry(
        &engine.context.retry,
        || engine.repository().fetch_all(skip_lfs),
        |err, attempt| {
            events::emit_log(
                engine.events(),
                LogLevel::Warn,
                format!("fetch attempt {attempt} failed, retrying: {err}"),
            );
        },
        None,
    )?;

    let timing = stopwatch.finish(1);
    events::emit_phase_end(engine.events(), &timing);
    Ok(timing)
}

/// One worktree registered under `worktreeBase`, with its branch resolved
/// (detached entries, the in-bare default-branch worktree, and anything
/// under `.diverged/` never appear here).
pub(crate) struct ExistingWorktree {
    pub path: PathBuf,
    pub branch: String,
}

pub(crate) struct Enumeration {
    pub remote_branches: Vec<RemoteBranch>,
    pub remote_names: HashSet<String>,
    pub existing: Vec<ExistingWorktree>,
    pub orphans: Vec<PathBuf>,
}

pub(crate) fn phase2_enumerate(engine: &Engine) -> anyhow::Result<(PhaseTiming, Enumeration)> {
    events::emit_phase_start(engine.events(), PhaseName::Enumerate);
    let stopwatch = PhaseStopwatch::start(PhaseName::Enumerate);

    let raw_remote = engine.repository().list_remote_branches_with_activity()?;
    let remote_branches = filter_by_age(
        raw_remote,
        engine.context.branch_max_age,
        &engine.context.default_branch_name,
    );
    let remote_names: HashSet<String> = remote_branches.iter().map(|b| b.name.clone()).collect();

    let default_worktree_path = engine
        .repository()
        .bare_repo_path()
        .join(&engine.context.default_branch_name);
    let diverged_dir = engine.context.worktree_base.join(".diverged");

    let mut existing = Vec::new();
    let mut existing_paths: HashSet<PathBuf> = HashSet::new();
    for wt in engine.repository().list_worktrees()? {
        let Some(branch) = wt.branch else {
            continue;
        };
        if wt.path == default_worktree_path || wt.path.starts_with(&diverged_dir) {
            continue;
        }
        existing_paths.insert(wt.path.clone());
        existing.push(ExistingWorktree {
            path: wt.path,
            branch,
        });
    }

    let orphans = find_orphans(&engine.context.worktree_base, &existing_paths, &diverged_dir);

    let op_count = remote_branches.len() + existing.len();
    let timing = stopwatch.finish(op_count);
    events::emit_phase_end(engine.events(), &timing);
    Ok((
        timing,
        Enumeration {
            remote_branches,
            remote_names,
            existing,
            orphans,
        },
    ))
}

/// Always keeps the default branch regardless of its last activity, since
/// its worktree lives inside the bare repo and is never a sync target.
fn filter_by_age(
    branches: Vec<RemoteBranch>,
    max_age: Option<std::time::Duration>,
    default_branch: &str,
) -> Vec<RemoteBranch> {
    let Some(max_age) = max_age else {
        return branches;
    };
    let cutoff = crate::utils::get_now().saturating_sub(max_age.as_secs());
    branches
        .into_iter()
        .filter(|b| {
            b.name == default_branch
                || b.last_activity
                    .map(|t| t.timestamp() >= cutoff as i64)
                    .unwrap_or(true)
        })
        .collect()
}

/// Recursively finds directories under `worktree_base` that are neither a
/// registered worktree nor an ancestor of one — a registered worktree at
/// `feat/a` protects `feat` from being flagged even though `feat` itself
/// isn't a worktree.
fn find_orphans(
    worktree_base: &Path,
    existing_paths: &HashSet<PathBuf>,
    diverged_dir: &Path,
) -> Vec<PathBuf> {
    let mut protected: HashSet<PathBuf> = existing_paths.clone();
    for path in existing_paths {
        let mut cur = path.as_path();
        while let Some(parent) = cur.parent() {
            if parent == worktree_base {
                break;
            }
            protected.insert(parent.to_path_buf());
            cur = parent;
        }
    }

    let mut orphans = Vec::new();
    collect_orphans(worktree_base, &protected, diverged_dir, &mut orphans);
    orphans
}

fn collect_orphans(
    dir: &Path,
    protected: &HashSet<PathBuf>,
    diverged_dir: &Path,
    out: &mut Vec<PathBuf>,
) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() || path == diverged_dir {
            continue;
        }
        if protected.contains(&path) {
            collect_orphans(&path, protected, diverged_dir, out);
        } else {
            out.push(path);
        }
    }
}

pub(crate) fn phase3_orphan_cleanup(
    engine: &Engine,
    enumeration: &Enumeration,
) -> anyhow::Result<PhaseTiming> {
    events::emit_phase_start(engine.events(), PhaseName::OrphanCleanup);
    let stopwatch = PhaseStopwatch::start(PhaseName::OrphanCleanup);
    let mut removed = 0;

    for orphan in &enumeration.orphans {
        if engine.cancellation().is_cancelled() {
            break;
        }
        match cleanup_one_orphan(orphan) {
            Ok(true) => {
                removed += 1;
                events::emit_log(
                    engine.events(),
                    LogLevel::Info,
                    format!("removed orphaned directory {}", orphan.display()),
                );
            }
            Ok(false) => {
                log::debug!(
                    "leaving {} alone, doesn't look like stray output",
                    orphan.display()
                );
            }
            Err(err) => {
                events::emit_log(
                    engine.events(),
                    LogLevel::Warn,
                    format!("failed to clean up orphan {}: {err}", orphan.display()),
                );
            }
        }
    }

    let timing = stopwatch.finish(removed);
    events::emit_phase_end(engine.events(), &timing);
    Ok(timing)
}

/// Removes `path` if it's empty, or if it has no `.git` entry at all (so it
/// plainly isn't a worktree — e.g. a partial checkout left by a crash).
/// Leaves anything that looks like a real, just-unregistered worktree alone.
fn cleanup_one_orphan(path: &Path) -> anyhow::Result<bool> {
    let mut entries = std::fs::read_dir(path)?;
    if entries.next().is_none() {
        std::fs::remove_dir(path)?;
        return Ok(true);
    }
    if !path.join(".git").exists() {
        std::fs::remove_dir_all(path)?;
        return Ok(true);
    }
    Ok(false)
}

pub(crate) enum FinalizeAction {
    Created {
        created_from_branch: String,
        created_from_commit: String,
    },
    Updated,
}

pub(crate) struct FinalizeTarget {
    pub path: PathBuf,
    pub branch: String,
    pub action: FinalizeAction,
}

#[derive(Default)]
pub(crate) struct Plan {
    pub to_create: Vec<String>,
    pub finalize: Vec<FinalizeTarget>,
}

pub(crate) fn phase4_classify(
    engine: &Engine,
    enumeration: &Enumeration,
) -> anyhow::Result<(PhaseTiming, Plan)> {
    events::emit_phase_start(engine.events(), PhaseName::Classify);
    let stopwatch = PhaseStopwatch::start(PhaseName::Classify);
    let mut plan = Plan::default();
    let mut op_count = 0;

    for existing in &enumeration.existing {
        if engine.cancellation().is_cancelled() {
            break;
        }
        op_count += 1;
        classify_and_act(engine, existing, enumeration, &mut plan);
    }

    let existing_branches: HashSet<&str> = enumeration
        .existing
        .iter()
        .map(|e| e.branch.as_str())
        .collect();
    for branch in &enumeration.remote_branches {
        if branch.name == engine.context.default_branch_name {
            continue;
        }
        if existing_branches.contains(branch.name.as_str()) {
            continue;
        }
        plan.to_create.push(branch.name.clone());
    }

    let timing = stopwatch.finish(op_count);
    events::emit_phase_end(engine.events(), &timing);
    Ok((timing, plan))
}

fn classify_and_act(
    engine: &Engine,
    existing: &ExistingWorktree,
    enumeration: &Enumeration,
    plan: &mut Plan,
) {
    let path = &existing.path;
    let branch = existing.branch.as_str();
    let branch_is_remote = enumeration.remote_names.contains(branch);
    let is_default_branch_worktree = branch == engine.context.default_branch_name;

    let metadata = engine
        .repository()
        .load_metadata(path, Some(branch))
        .unwrap_or_else(|err| {
            log::warn!("failed to load metadata for {}: {err}", path.display());
            None
        });

    let status = {
        let _guard = engine.limiter().acquire(Class::Status);
        match engine
            .repository()
            .worktree_status(path, Some(branch), metadata.as_ref().map(|m| m.last_sync_commit.as_str()))
        {
            Ok(status) => status,
            Err(err) => {
                events::emit_log(
                    engine.events(),
                    LogLevel::Warn,
                    format!("status probe failed for {}: {err}", path.display()),
                );
                return;
            }
        }
    };

    let (can_fast_forward, is_local_ahead_of_remote, compare_tree_content_identical, worktree_behind) =
        if branch_is_remote && !is_default_branch_worktree {
            gather_comparison(engine, path, branch)
        } else {
            (true, false, false, false)
        };

    let head_matches_last_sync = metadata.as_ref().map(|m| {
        engine
            .repository()
            .get_current_commit(path)
            .map(|head| head == m.last_sync_commit)
            .unwrap_or(false)
    });

    let input = ClassifyInput {
        branch_is_remote,
        is_default_branch_worktree,
        status,
        can_fast_forward,
        is_local_ahead_of_remote,
        compare_tree_content_identical,
        head_matches_last_sync,
        update_existing_worktrees: engine.context.update_existing,
        worktree_behind,
    };
    let decision = classify::classify(&input);
    execute_decision(engine, path, branch, decision, plan);
}

fn gather_comparison(engine: &Engine, path: &Path, branch: &str) -> (bool, bool, bool, bool) {
    let repo = engine.repository();
    let can_fast_forward = repo.can_fast_forward(path, branch).unwrap_or(false);
    let is_local_ahead_of_remote = repo.is_local_ahead_of_remote(path, branch).unwrap_or(false);
    let compare_tree_content_identical = repo.compare_tree_content(path, branch).unwrap_or(false);
    let worktree_behind = if can_fast_forward {
        match (repo.get_current_commit(path), repo.get_remote_commit(branch)) {
            (Ok(head), Ok(remote)) => head != remote,
            _ => false,
        }
    } else {
        false
    };
    (
        can_fast_forward,
        is_local_ahead_of_remote,
        compare_tree_content_identical,
        worktree_behind,
    )
}

fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::Remove => "remove",
        Decision::WarnKeep { .. } => "warn-keep",
        Decision::Skip { .. } => "skip",
        Decision::Update => "update",
        Decision::Reset => "reset",
        Decision::Quarantine => "quarantine",
    }
}

fn execute_decision(engine: &Engine, path: &Path, branch: &str, decision: Decision, plan: &mut Plan) {
    events::emit_worktree_status(engine.events(), branch, decision_label(&decision));
    match decision {
        Decision::Remove => {
            let _guard = engine.limiter().acquire(Class::Remove);
            match engine.repository().remove_worktree(path) {
                Ok(()) => {
                    if let Err(err) = engine.repository().delete_metadata(path) {
                        log::warn!("removed '{branch}' but failed to delete its metadata: {err}");
                    }
                    events::emit_log(engine.events(), LogLevel::Info, format!("removed '{branch}'"));
                }
                Err(err) => events::emit_log(
                    engine.events(),
                    LogLevel::Warn,
                    format!("failed to remove '{branch}': {err}"),
                ),
            }
        }
        Decision::WarnKeep { reasons } => {
            events::emit_log(
                engine.events(),
                LogLevel::Warn,
                format!(
                    "'{branch}' at {} has unpushed work and its upstream is gone ({}); not removing, review manually",
                    path.display(),
                    reasons.join(", ")
                ),
            );
        }
        Decision::Skip { reasons } => {
            log::debug!("skipping '{branch}': {}", reasons.join(", "));
        }
        Decision::Update => {
            let _guard = engine.limiter().acquire(Class::Update);
            match engine
                .repository()
                .update_worktree(path, branch, engine.context.skip_lfs)
            {
                Ok(()) => {
                    plan.finalize.push(FinalizeTarget {
                        path: path.to_path_buf(),
                        branch: branch.to_string(),
                        action: FinalizeAction::Updated,
                    });
                    events::emit_log(engine.events(), LogLevel::Info, format!("updated '{branch}'"));
                }
                Err(err) => events::emit_log(
                    engine.events(),
                    LogLevel::Warn,
                    format!("failed to update '{branch}': {err}"),
                ),
            }
        }
        Decision::Reset => {
            let _guard = engine.limiter().acquire(Class::Update);
            match engine.repository().reset_to_upstream(path, branch) {
                Ok(()) => {
                    plan.finalize.push(FinalizeTarget {
                        path: path.to_path_buf(),
                        branch: branch.to_string(),
                        action: FinalizeAction::Updated,
                    });
                    events::emit_log(
                        engine.events(),
                        LogLevel::Info,
                        format!("reset '{branch}' to upstream"),
                    );
                }
                Err(err) => events::emit_log(
                    engine.events(),
                    LogLevel::Warn,
                    format!("failed to reset '{branch}': {err}"),
                ),
            }
        }
        Decision::Quarantine => match quarantine_worktree(engine, path) {
            Ok(()) => {
                plan.to_create.push(branch.to_string());
                events::emit_log(
                    engine.events(),
                    LogLevel::Warn,
                    format!("quarantined '{branch}': diverged from upstream with local commits"),
                );
            }
            Err(err) => events::emit_log(
                engine.events(),
                LogLevel::Warn,
                format!("failed to quarantine '{branch}': {err}"),
            ),
        },
    }
}

/// Moves a diverged worktree into `.diverged/<date>-<branch>-<rand>/` and
/// prunes its now-stale registration, freeing the original path for Phase 5
/// to recreate fresh. The sync metadata at `.git/worktrees/<original
/// basename>/` is deliberately left where it is rather than following the
/// move — it's keyed by the worktree's *original* basename (matching git's
/// own internal naming, which is fixed at `worktree add` time and doesn't
/// follow a later `mv`), and `prune_worktrees` clears it along with the
/// stale registration. The quarantined content itself is what a human
/// reviews; nothing downstream needs its history.
fn quarantine_worktree(engine: &Engine, path: &Path) -> anyhow::Result<()> {
    let branch = engine
        .repository()
        .get_current_branch(path)
        .ok()
        .flatten()
        .unwrap_or_else(|| "unknown".to_string());

    let diverged_dir = engine.context.worktree_base.join(".diverged");
    std::fs::create_dir_all(&diverged_dir)?;

    let dest = diverged_dir.join(format!(
        "{}-{}-{}",
        today_date_string(),
        sanitize_branch_name(&branch),
        random_suffix(6)
    ));

    move_path(path, &dest)?;
    engine.repository().prune_worktrees()?;
    Ok(())
}

fn sanitize_branch_name(branch: &str) -> String {
    let replaced: String = branch
        .chars()
        .map(|c| {
            if c == '/' {
                '-'
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    sanitize_filename::sanitize(replaced)
}

fn today_date_string() -> String {
    chrono::DateTime::from_timestamp(crate::utils::get_now() as i64, 0)
        .unwrap_or_else(chrono::Utc::now)
        .format("%Y-%m-%d")
        .to_string()
}

fn random_suffix(len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

/// `fs::rename`, falling back to a reflink-aware recursive copy plus delete
/// when source and destination are on different filesystems (quarantine
/// directories and worktrees can legitimately live on separate mounts).
fn move_path(src: &Path, dest: &Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::CrossesDevices => {
            copy_dir_recursive(src, dest)?;
            std::fs::remove_dir_all(src)?;
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn copy_dir_recursive(src: &Path, dest: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let src_path = entry.path();
        let dest_path = dest.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dest_path)?;
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(&src_path)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &dest_path)?;
            #[cfg(not(unix))]
            let _ = std::fs::copy(&src_path, &dest_path);
        } else {
            reflink_copy::reflink_or_copy(&src_path, &dest_path)?;
        }
    }
    Ok(())
}

pub(crate) fn phase5_create_missing(engine: &Engine, plan: &mut Plan) -> anyhow::Result<PhaseTiming> {
    events::emit_phase_start(engine.events(), PhaseName::CreateMissing);
    let stopwatch = PhaseStopwatch::start(PhaseName::CreateMissing);

    let created_from_commit = engine
        .repository()
        .get_remote_commit(&engine.context.default_branch_name)
        .unwrap_or_default();

    let results: Vec<anyhow::Result<FinalizeTarget>> = plan
        .to_create
        .par_iter()
        .map(|branch| create_one(engine, branch, &created_from_commit))
        .collect();

    let count = plan.to_create.len();
    for (branch, result) in plan.to_create.iter().zip(results) {
        match result {
            Ok(target) => plan.finalize.push(target),
            Err(err) => events::emit_log(
                engine.events(),
                LogLevel::Warn,
                format!("failed to create worktree for '{branch}': {err}"),
            ),
        }
    }

    let timing = stopwatch.finish(count);
    events::emit_phase_end(engine.events(), &timing);
    Ok(timing)
}

fn create_one(engine: &Engine, branch: &str, created_from_commit: &str) -> anyhow::Result<FinalizeTarget> {
    let _guard = engine.limiter().acquire(Class::Create);
    let path = engine.context.worktree_base.join(branch);
    engine
        .repository()
        .add_worktree(branch, &path, engine.context.skip_lfs)?;

    Ok(FinalizeTarget {
        path,
        branch: branch.to_string(),
        action: FinalizeAction::Created {
            created_from_branch: engine.context.default_branch_name.clone(),
            created_from_commit: created_from_commit.to_string(),
        },
    })
}

pub(crate) fn phase6_finalize(engine: &Engine, plan: &Plan) -> anyhow::Result<PhaseTiming> {
    events::emit_phase_start(engine.events(), PhaseName::Finalize);
    let stopwatch = PhaseStopwatch::start(PhaseName::Finalize);
    let mut finalized = 0;

    for target in &plan.finalize {
        if engine.cancellation().is_cancelled() {
            break;
        }
        match finalize_one(engine, target) {
            Ok(()) => finalized += 1,
            Err(err) => events::emit_log(
                engine.events(),
                LogLevel::Warn,
                format!(
                    "failed to record sync metadata for '{}': {err}",
                    target.branch
                ),
            ),
        }
    }

    let timing = stopwatch.finish(finalized);
    events::emit_phase_end(engine.events(), &timing);
    Ok(timing)
}

fn finalize_one(engine: &Engine, target: &FinalizeTarget) -> anyhow::Result<()> {
    let head = engine.repository().get_current_commit(&target.path)?;
    match &target.action {
        FinalizeAction::Created {
            created_from_branch,
            created_from_commit,
        } => {
            let upstream = format!("origin/{}", target.branch);
            engine.repository().create_metadata(
                &target.path,
                &head,
                &upstream,
                created_from_branch,
                created_from_commit,
            )?;
        }
        FinalizeAction::Updated => {
            engine.repository().update_last_sync(
                &target.path,
                Some(&target.branch),
                &head,
                SyncAction::Updated,
                &engine.context.default_branch_name,
            )?;
        }
    }
    Ok(())
}
