//! Configuration: per-repository sync settings loaded from a TOML file.
//!
//! Parsed by hand with [`toml`] rather than a layered config-merge crate —
//! there is exactly one file, one shape, and no environment/CLI-flag
//! overlay to reconcile, so the extra machinery would buy nothing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::concurrency::ParallelismConfig;
use crate::git::SyncError;
use crate::retry::{MaxAttempts, RetryConfig};

/// `maxAttempts` as written in TOML: either a positive integer or the
/// literal string `"unlimited"`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MaxAttemptsSetting {
    Unlimited(UnlimitedMarker),
    Bounded(u32),
}

/// Deserializes only from the literal string `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
pub struct UnlimitedMarker;

impl Serialize for UnlimitedMarker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("unlimited")
    }
}

impl<'de> Deserialize<'de> for UnlimitedMarker {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "unlimited" {
            Ok(UnlimitedMarker)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected the literal string \"unlimited\", got {s:?}"
            )))
        }
    }
}

impl Default for MaxAttemptsSetting {
    fn default() -> Self {
        MaxAttemptsSetting::Unlimited(UnlimitedMarker)
    }
}

impl From<&MaxAttemptsSetting> for MaxAttempts {
    fn from(value: &MaxAttemptsSetting) -> Self {
        match value {
            MaxAttemptsSetting::Unlimited(_) => MaxAttempts::Unlimited,
            MaxAttemptsSetting::Bounded(n) => MaxAttempts::Bounded(*n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    pub max_attempts: MaxAttemptsSetting,
    pub max_lfs_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: MaxAttemptsSetting::default(),
            max_lfs_retries: defaults.max_lfs_retries,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            jitter_ms: None,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        RetryConfig {
            max_attempts: (&s.max_attempts).into(),
            initial_delay: Duration::from_millis(s.initial_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            backoff_multiplier: s.backoff_multiplier,
            jitter: s.jitter_ms.map(Duration::from_millis),
            max_lfs_retries: s.max_lfs_retries,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ParallelismSettings {
    pub max_repositories: usize,
    pub max_worktree_creation: usize,
    pub max_worktree_updates: usize,
    pub max_worktree_removal: usize,
    pub max_status_checks: usize,
}

impl Default for ParallelismSettings {
    fn default() -> Self {
        let defaults = ParallelismConfig::default();
        Self {
            max_repositories: defaults.max_repositories,
            max_worktree_creation: defaults.max_worktree_creation,
            max_worktree_updates: defaults.max_worktree_updates,
            max_worktree_removal: defaults.max_worktree_removal,
            max_status_checks: defaults.max_status_checks,
        }
    }
}

impl From<&ParallelismSettings> for ParallelismConfig {
    fn from(s: &ParallelismSettings) -> Self {
        ParallelismConfig {
            max_worktree_creation: s.max_worktree_creation,
            max_worktree_updates: s.max_worktree_updates,
            max_worktree_removal: s.max_worktree_removal,
            max_status_checks: s.max_status_checks,
            max_repositories: s.max_repositories,
        }
    }
}

/// One repository's sync configuration, as it appears under `[[repo]]` in
/// the fleet config file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoConfig {
    pub repo_url: String,
    pub worktree_dir: PathBuf,
    pub bare_repo_dir: Option<PathBuf>,
    pub cron_schedule: Option<String>,
    #[serde(default)]
    pub run_once: bool,
    /// `30d` / `2w` / `6m` / `1y` — parsed by [`crate::config::parse_branch_max_age`].
    pub branch_max_age: Option<String>,
    #[serde(default)]
    pub skip_lfs: bool,
    #[serde(default = "default_true")]
    pub update_existing_worktrees: bool,
    #[serde(default)]
    pub files_to_copy_on_branch_create: Vec<String>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub parallelism: ParallelismSettings,
    #[serde(default)]
    pub debug: bool,
}

fn default_true() -> bool {
    true
}

/// The top-level config file: a fleet of repositories sharing one process.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FleetConfig {
    #[serde(rename = "repo")]
    pub repos: Vec<RepoConfig>,
    /// How many repositories the Engine Supervisor syncs at once. Falls back
    /// to the first repo's `parallelism.maxRepositories` when unset, since
    /// that's the one knob every `[[repo]]` table already carries a default
    /// for.
    #[serde(default)]
    pub max_repositories: Option<usize>,
}

impl FleetConfig {
    /// Resolved supervisor-level fan-out, never zero.
    pub fn max_repositories(&self) -> usize {
        self.max_repositories.unwrap_or_else(|| {
            self.repos
                .first()
                .map(|r| r.parallelism.max_repositories)
                .unwrap_or(2)
        })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| SyncError::ConfigValidation {
            field: "path".to_string(),
            reason: format!("could not read {}: {err}", path.display()),
        })?;
        let config: FleetConfig =
            toml::from_str(&contents).map_err(|err| SyncError::ConfigValidation {
                field: "(toml)".to_string(),
                reason: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.repos.is_empty() {
            return Err(SyncError::ConfigValidation {
                field: "repo".to_string(),
                reason: "at least one [[repo]] section is required".to_string(),
            }
            .into());
        }
        for repo in &self.repos {
            repo.validate()?;
        }
        Ok(())
    }
}

impl RepoConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.repo_url.trim().is_empty() {
            return Err(SyncError::ConfigValidation {
                field: "repoUrl".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if let Some(max_age) = &self.branch_max_age {
            parse_branch_max_age(max_age).map_err(|reason| SyncError::ConfigValidation {
                field: "branchMaxAge".to_string(),
                reason,
            })?;
        }
        crate::concurrency::ConcurrencyLimiter::new(&(&self.parallelism).into()).map_err(
            |err| SyncError::ConfigValidation {
                field: "parallelism".to_string(),
                reason: err.to_string(),
            },
        )?;
        Ok(())
    }

    /// The bare repository's path on disk, defaulting to
    /// `.bare/<repo-name>` derived from the last path segment of `repoUrl`.
    pub fn resolved_bare_repo_dir(&self) -> PathBuf {
        if let Some(dir) = &self.bare_repo_dir {
            return dir.clone();
        }
        let name = self
            .repo_url
            .rsplit('/')
            .next()
            .unwrap_or(&self.repo_url)
            .trim_end_matches(".git");
        PathBuf::from(".bare").join(name)
    }
}

/// Parses `<n><unit>` where unit is `d` (days), `w` (weeks), `m` (30-day
/// months), or `y` (365-day years) into a [`Duration`]. Months and years use
/// fixed-length approximations rather than calendar arithmetic — branch-age
/// filtering is a coarse cutoff, not a billing calculation.
pub fn parse_branch_max_age(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("branchMaxAge must not be empty".to_string());
    }
    let (digits, unit) = input.split_at(input.len() - 1);
    let count: u64 = digits
        .parse()
        .map_err(|_| format!("invalid branchMaxAge {input:?}: expected <number><unit>"))?;
    let days = match unit {
        "d" => count,
        "w" => count * 7,
        "m" => count * 30,
        "y" => count * 365,
        other => {
            return Err(format!(
                "invalid branchMaxAge unit {other:?}: expected one of d, w, m, y"
            ));
        }
    };
    Ok(Duration::from_secs(days * 86_400))
}
