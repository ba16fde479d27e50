//! Git adapter for the repair loop.
//!
//! A thin wrapper over `git` subprocess calls. Every call runs in the
//! repository root so behavior never depends on the caller's cwd.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::CommandResult;
use crate::io::process::{RunOptions, run_command};

/// Size limits for the working-tree diff placed into prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffLimits {
    pub max_chars: usize,
    pub max_lines: usize,
}

impl Default for DiffLimits {
    fn default() -> Self {
        Self {
            max_chars: 50_000,
            max_lines: 1_000,
        }
    }
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Top of the work tree containing `dir`, or `None` outside a repository.
    pub fn show_toplevel(dir: &Path) -> Option<PathBuf> {
        let result = run_command(
            &git_tokens(&["rev-parse", "--show-toplevel"]),
            &RunOptions {
                cwd: Some(dir),
                ..RunOptions::default()
            },
        )
        .ok()?;
        let top = result.stdout.trim();
        (result.succeeded() && !top.is_empty()).then(|| PathBuf::from(top))
    }

    /// Unstaged (or, with `staged`, cached) diff. Failures read as an empty diff.
    pub fn diff(&self, staged: bool) -> Result<String> {
        let args: &[&str] = if staged {
            &["diff", "--cached"]
        } else {
            &["diff"]
        };
        Ok(self.run(args)?.stdout)
    }

    /// Like [`Git::diff`], but large diffs are replaced by a `--stat` summary.
    #[instrument(skip_all, fields(staged))]
    pub fn diff_limited(&self, staged: bool, limits: DiffLimits) -> Result<String> {
        let full = self.diff(staged)?;
        let char_count = full.chars().count();
        let line_count = full.matches('\n').count();
        if char_count <= limits.max_chars && line_count <= limits.max_lines {
            return Ok(full);
        }

        debug!(char_count, line_count, "diff exceeds limits, summarizing");
        let stat_args: &[&str] = if staged {
            &["diff", "--cached", "--stat"]
        } else {
            &["diff", "--stat"]
        };
        let stat = self.run(stat_args)?.stdout;
        Ok(format!(
            "[Diff too large: {} chars, {} lines]\n\n\
             Summary (git diff --stat):\n{stat}\n\n\
             Note: Full diff exceeds limits ({} chars or {} lines).\n\
             The focused diff above shows changes to files implicated in this failure.\n\
             Review the CI error output to identify which files need attention.",
            group_thousands(char_count),
            group_thousands(line_count),
            group_thousands(limits.max_chars),
            group_thousands(limits.max_lines),
        ))
    }

    /// `git status --short`, trimmed.
    pub fn status_short(&self) -> Result<String> {
        Ok(self.run(&["status", "--short"])?.stdout.trim().to_string())
    }

    /// Working-tree diff for a single path.
    pub fn file_diff(&self, path: &str) -> Result<String> {
        Ok(self.run(&["diff", "--", path])?.stdout)
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!out.stdout.trim().is_empty())
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (cannot push)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Commit staged changes; the body becomes a second `-m` paragraph.
    #[instrument(skip_all)]
    pub fn commit(&self, summary: &str, body: &str) -> Result<()> {
        let mut args = vec!["commit", "-m", summary];
        let body = body.trim();
        if !body.is_empty() {
            args.extend(["-m", body]);
        }
        self.run_checked_live(&args)
    }

    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked_live(&["push", remote, branch])
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandResult> {
        let output = self.run(args)?;
        if !output.succeeded() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            ));
        }
        Ok(output)
    }

    fn run_checked_live(&self, args: &[&str]) -> Result<()> {
        let output = run_command(
            &git_tokens(args),
            &RunOptions {
                stream_live: true,
                cwd: Some(&self.workdir),
                ..RunOptions::default()
            },
        )?;
        if !output.succeeded() {
            return Err(anyhow!(
                "git {} exited with status {}",
                args.join(" "),
                output.exit_code
            ));
        }
        Ok(())
    }

    fn run(&self, args: &[&str]) -> Result<CommandResult> {
        run_command(
            &git_tokens(args),
            &RunOptions {
                cwd: Some(&self.workdir),
                ..RunOptions::default()
            },
        )
    }
}

fn git_tokens(args: &[&str]) -> Vec<String> {
    std::iter::once("git")
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
