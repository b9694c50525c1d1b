//! Thin wrapper around [`std::process::Command`] used for every external
//! subprocess this crate shells out to (`git`, `git-lfs`).
//!
//! Centralizing process spawning here gives us one place to attach a
//! human-readable `context` label (usually the branch or worktree a command
//! is acting on) so error messages stay useful once they've propagated a few
//! call frames up through the sync engine.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context as _;

/// Builder for a single subprocess invocation.
///
/// ```ignore
/// let output = Cmd::new("git")
///     .args(["fetch", "--prune", "origin"])
///     .current_dir(&bare_repo_path)
///     .context(&branch_name)
///     .run()?;
/// ```
#[derive(Debug)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    envs: HashMap<String, String>,
    context: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: HashMap::new(),
            context: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }

    /// Attach a human-readable label (typically a branch or worktree name)
    /// used only to annotate error messages if this command fails to spawn
    /// or exits non-zero.
    pub fn context(mut self, label: impl AsRef<str>) -> Self {
        self.context = Some(label.as_ref().to_string());
        self
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd
    }

    fn describe(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        let cmdline = parts.join(" ");
        match &self.context {
            Some(label) => format!("`{cmdline}` ({label})"),
            None => format!("`{cmdline}`"),
        }
    }

    /// Run the command to completion, capturing stdout/stderr.
    ///
    /// Only spawn failures (missing binary, permission errors) are turned
    /// into an `Err` here — a non-zero exit status is returned as `Ok` so
    /// callers can inspect `output.status` and `output.stderr` to build a
    /// typed error (see [`crate::git::error::classify_git_stderr`]).
    pub fn run(&self) -> anyhow::Result<Output> {
        self.build()
            .output()
            .with_context(|| format!("Failed to spawn {}", self.describe()))
    }

    /// Convenience for callers that only care whether the command exited
    /// successfully.
    pub fn run_checked(&self) -> anyhow::Result<Output> {
        let output = self.run()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} failed: {}", self.describe(), stderr.trim());
        }
        Ok(output)
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arg_list(&self) -> &[String] {
        &self.args
    }
}

/// Locate an executable on `PATH` without invoking a shell.
pub fn find_on_path(name: impl AsRef<OsStr>) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let output = Cmd::new("git").args(["--version"]).run().unwrap();
        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).starts_with("git version"));
    }

    #[test]
    fn run_reports_nonzero_exit_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let output = Cmd::new("git")
            .args(["rev-parse", "--verify", "refs/heads/does-not-exist"])
            .current_dir(dir.path())
            .run()
            .unwrap();
        assert!(!output.status.success());
    }

    #[test]
    fn run_checked_bails_with_context_label() {
        let dir = tempfile::tempdir().unwrap();
        let err = Cmd::new("git")
            .args(["rev-parse", "--verify", "refs/heads/does-not-exist"])
            .current_dir(dir.path())
            .context("feature/missing")
            .run_checked()
            .unwrap_err();
        assert!(err.to_string().contains("feature/missing"));
    }

    #[test]
    fn missing_binary_is_an_error() {
        let err = Cmd::new("definitely-not-a-real-binary-xyz")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
