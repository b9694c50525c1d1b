//! The Metadata Store: per-worktree JSON records under the bare repository's
//! internal worktree directory, used to disambiguate unpushed local work
//! from a stale upstream snapshot.

use std::path::{Path, PathBuf};

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::git::Repository;
use crate::utils::now_iso8601;

/// What advanced a worktree during one [`SyncHistoryEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Fetched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SyncHistoryEntry {
    pub date: String,
    pub commit: String,
    pub action: SyncAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CreatedFrom {
    pub branch: String,
    pub commit: String,
}

/// The persisted record at
/// `<bareRepo>/.git/worktrees/<basename>/sync-metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub last_sync_commit: String,
    pub last_sync_date: String,
    pub upstream_branch: String,
    pub created_from: CreatedFrom,
    /// Bounded to the 10 most recent entries, oldest first.
    pub sync_history: Vec<SyncHistoryEntry>,
}

const MAX_HISTORY: usize = 10;

impl SyncMetadata {
    fn file_name() -> &'static str {
        "sync-metadata.json"
    }

    fn push_history(&mut self, commit: String, action: SyncAction) {
        self.sync_history.push(SyncHistoryEntry {
            date: now_iso8601(),
            commit,
            action,
        });
        if self.sync_history.len() > MAX_HISTORY {
            let drop = self.sync_history.len() - MAX_HISTORY;
            self.sync_history.drain(0..drop);
        }
    }

    /// A short hash (≥6 hex chars) is accepted when reading; full SHAs are
    /// always written.
    fn is_plausible_commit(s: &str) -> bool {
        s.len() >= 6 && s.chars().all(|c| c.is_ascii_hexdigit())
    }

    fn validate(&self) -> bool {
        Self::is_plausible_commit(&self.last_sync_commit)
            && DateTime::parse_from_rfc3339(&self.last_sync_date).is_ok()
            && !self.upstream_branch.is_empty()
    }
}

impl Repository {
    /// Internal-git-dir path for the worktree's metadata, using the
    /// **basename** of the worktree path — mirroring how git itself names
    /// `.git/worktrees/<basename>` — not the branch name, since a branch
    /// with slashes would otherwise require a nested directory inside the
    /// metadata store that nothing else expects.
    fn metadata_path(&self, worktree_path: &Path) -> PathBuf {
        let basename = worktree_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bare_repo_path()
            .join(".git")
            .join("worktrees")
            .join(basename)
            .join(SyncMetadata::file_name())
    }

    /// Pre-basename-convention path: `<bareRepo>/.git/worktrees/<branch
    /// name, slashes preserved>/sync-metadata.json`. Only ever read, to
    /// support one-time migration.
    fn legacy_metadata_path(&self, branch: &str) -> PathBuf {
        self.bare_repo_path()
            .join(".git")
            .join("worktrees")
            .join(branch)
            .join(SyncMetadata::file_name())
    }

    pub fn create_metadata(
        &self,
        worktree_path: &Path,
        current_commit: &str,
        upstream: &str,
        created_from_branch: &str,
        created_from_commit: &str,
    ) -> anyhow::Result<SyncMetadata> {
        let mut metadata = SyncMetadata {
            last_sync_commit: current_commit.to_string(),
            last_sync_date: now_iso8601(),
            upstream_branch: upstream.to_string(),
            created_from: CreatedFrom {
                branch: created_from_branch.to_string(),
                commit: created_from_commit.to_string(),
            },
            sync_history: Vec::new(),
        };
        metadata.push_history(current_commit.to_string(), SyncAction::Created);
        self.write_metadata(worktree_path, &metadata)?;
        Ok(metadata)
    }

    /// Load the record for `worktree_path`. Falls back to the legacy
    /// branch-named path and migrates it in place (write new, delete old,
    /// prune now-empty legacy parent dirs) if found there instead. Returns
    /// `None`, logging a warning, if the record fails shape validation —
    /// a corrupt file is treated the same as a missing one rather than
    /// propagated as an error, since the Sync Engine's auto-repair path
    /// handles "no metadata" uniformly.
    pub fn load_metadata(
        &self,
        worktree_path: &Path,
        branch: Option<&str>,
    ) -> anyhow::Result<Option<SyncMetadata>> {
        let path = self.metadata_path(worktree_path);
        if path.is_file() {
            return Ok(self.read_and_validate(&path));
        }

        if let Some(branch) = branch {
            let legacy = self.legacy_metadata_path(branch);
            if legacy.is_file() {
                if let Some(metadata) = self.read_and_validate(&legacy) {
                    self.write_metadata(worktree_path, &metadata)?;
                    self.remove_legacy(&legacy)?;
                    return Ok(Some(metadata));
                }
            }
        }

        Ok(None)
    }

    fn read_and_validate(&self, path: &Path) -> Option<SyncMetadata> {
        let contents = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<SyncMetadata>(&contents) {
            Ok(metadata) if metadata.validate() => Some(metadata),
            Ok(_) => {
                log::warn!("metadata at {} failed shape validation", path.display());
                None
            }
            Err(err) => {
                log::warn!("metadata at {} is not valid JSON: {err}", path.display());
                None
            }
        }
    }

    fn remove_legacy(&self, legacy_path: &Path) -> anyhow::Result<()> {
        std::fs::remove_file(legacy_path)?;
        let mut dir = legacy_path.parent();
        while let Some(d) = dir {
            if d == self.bare_repo_path().join(".git").join("worktrees") {
                break;
            }
            match std::fs::read_dir(d) {
                Ok(mut entries) if entries.next().is_none() => {
                    let _ = std::fs::remove_dir(d);
                    dir = d.parent();
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Read-modify-write, appending one history entry and trimming to the
    /// last 10. If no record exists, attempts auto-repair: reads the
    /// worktree's actual HEAD and branch and synthesizes an initial record
    /// using `default_branch_name` as the `createdFrom` branch (the true
    /// creation branch is unrecoverable once the record is gone, so the
    /// default branch is the best available stand-in). If even that fails
    /// (e.g. the worktree itself is gone), the underlying git error
    /// propagates rather than being swallowed.
    pub fn update_last_sync(
        &self,
        worktree_path: &Path,
        branch: Option<&str>,
        new_commit: &str,
        action: SyncAction,
        default_branch_name: &str,
    ) -> anyhow::Result<SyncMetadata> {
        let mut metadata = match self.load_metadata(worktree_path, branch)? {
            Some(metadata) => metadata,
            None => {
                log::warn!(
                    "no metadata for {}, auto-repairing",
                    worktree_path.display()
                );
                let head = self.get_current_commit(worktree_path)?;
                let upstream = branch
                    .map(|b| format!("origin/{b}"))
                    .unwrap_or_else(|| format!("origin/{default_branch_name}"));
                self.create_metadata(worktree_path, &head, &upstream, default_branch_name, &head)?
            }
        };

        metadata.last_sync_commit = new_commit.to_string();
        metadata.last_sync_date = now_iso8601();
        metadata.push_history(new_commit.to_string(), action);
        self.write_metadata(worktree_path, &metadata)?;
        Ok(metadata)
    }

    /// Idempotent: removing an already-absent file is not an error.
    pub fn delete_metadata(&self, worktree_path: &Path) -> anyhow::Result<()> {
        let path = self.metadata_path(worktree_path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Write via a temp file plus rename, so a process crash mid-write never
    /// leaves a truncated or half-written record behind for the next
    /// `load_metadata` to reject.
    fn write_metadata(&self, worktree_path: &Path, metadata: &SyncMetadata) -> anyhow::Result<()> {
        let path = self.metadata_path(worktree_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(metadata)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SyncMetadata {
        SyncMetadata {
            last_sync_commit: "abc123".to_string(),
            last_sync_date: "2024-06-01T00:00:00Z".to_string(),
            upstream_branch: "origin/feat/a".to_string(),
            created_from: CreatedFrom {
                branch: "main".to_string(),
                commit: "def456".to_string(),
            },
            sync_history: Vec::new(),
        }
    }

    #[test]
    fn test_validate_accepts_short_hash() {
        assert!(sample().validate());
    }

    #[test]
    fn test_validate_rejects_non_hex_commit() {
        let mut metadata = sample();
        metadata.last_sync_commit = "not-hex!".to_string();
        assert!(!metadata.validate());
    }

    #[test]
    fn test_validate_rejects_bad_date() {
        let mut metadata = sample();
        metadata.last_sync_date = "not a date".to_string();
        assert!(!metadata.validate());
    }

    #[test]
    fn test_validate_rejects_empty_upstream() {
        let mut metadata = sample();
        metadata.upstream_branch = String::new();
        assert!(!metadata.validate());
    }

    #[test]
    fn test_push_history_trims_to_ten() {
        let mut metadata = sample();
        for i in 0..15 {
            metadata.push_history(format!("{i:06x}"), SyncAction::Fetched);
        }
        assert_eq!(metadata.sync_history.len(), MAX_HISTORY);
        assert_eq!(metadata.sync_history.last().unwrap().commit, "00000e");
    }

    #[test]
    fn test_serde_round_trip_uses_lowercase_action() {
        let json = serde_json::to_string(&SyncAction::Created).unwrap();
        assert_eq!(json, "\"created\"");
    }
}
