//! Applying unified diffs to the working tree.
//!
//! `git apply` is tried first. A diff that git reports as already applied is a
//! no-op. Anything else falls through to POSIX `patch`. Each backend is
//! dry-run before it touches files, so a failed path never leaves the tree
//! partially patched.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::CommandResult;
use crate::error::PatchApplyError;
use crate::io::process::{RunOptions, run_command};

const GIT_CHECK: &[&str] = &["git", "apply", "--check", "--whitespace=nowarn"];
const GIT_REVERSE_CHECK: &[&str] = &["git", "apply", "--check", "--reverse", "--whitespace=nowarn"];
const GIT_APPLY: &[&str] = &["git", "apply", "--allow-empty", "--whitespace=nowarn"];
const PATCH_ARGS: &[&str] = &["--batch", "--forward", "--reject-file=-", "-p1"];

/// How a successful [`PatchApplier::apply`] got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    AppliedWithGit,
    AlreadyApplied,
    AppliedWithPatch,
}

#[derive(Debug, Clone)]
pub struct PatchApplier {
    workdir: PathBuf,
    patch_program: String,
}

impl PatchApplier {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            patch_program: "patch".to_string(),
        }
    }

    /// Use a different binary for the POSIX fallback.
    pub fn with_patch_program(mut self, program: impl Into<String>) -> Self {
        self.patch_program = program.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Apply `diff_text`.
    ///
    /// Apply failures surface as [`PatchApplyError`] inside the returned
    /// error; any other error means a backend could not be run at all.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn apply(&self, diff_text: &str) -> Result<ApplyOutcome> {
        let normalized = ensure_trailing_newline(diff_text);
        let input = normalized.as_bytes();

        let check = self.run_tool(GIT_CHECK, input, &[])?;
        let check_output = check.combined_output();
        if check.succeeded() {
            let applied = self.run_tool(GIT_APPLY, input, &[])?;
            if !applied.succeeded() {
                warn!(exit_code = applied.exit_code, "git apply failed after a clean check");
                return Err(PatchApplyError::git_apply_failed(&applied.combined_output()).into());
            }
            print_trimmed(&applied.stdout);
            debug!("applied with git");
            return Ok(ApplyOutcome::AppliedWithGit);
        }

        if self.run_tool(GIT_REVERSE_CHECK, input, &[])?.succeeded() {
            println!("[info] Patch already applied according to `git apply`; skipping.");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        info!("git apply --check failed, falling back to patch");
        self.apply_with_patch_tool(input, &check_output)?;
        Ok(ApplyOutcome::AppliedWithPatch)
    }

    fn apply_with_patch_tool(&self, input: &[u8], check_output: &str) -> Result<()> {
        let env = patch_env();

        let mut dry_run: Vec<&str> = vec![self.patch_program.as_str()];
        dry_run.extend_from_slice(PATCH_ARGS);
        dry_run.push("--dry-run");
        let preflight = self.run_tool(&dry_run, input, &env)?;
        if !preflight.succeeded() {
            warn!(exit_code = preflight.exit_code, "patch dry-run failed");
            return Err(
                PatchApplyError::preflight_failed(check_output, &preflight.combined_output()).into(),
            );
        }

        let mut apply: Vec<&str> = vec![self.patch_program.as_str()];
        apply.extend_from_slice(PATCH_ARGS);
        let actual = self.run_tool(&apply, input, &env)?;
        if !actual.succeeded() {
            return Err(PatchApplyError::patch_exit(actual.exit_code, &actual.combined_output()).into());
        }
        print_trimmed(&actual.stdout);
        Ok(())
    }

    fn run_tool(
        &self,
        args: &[&str],
        input: &[u8],
        env: &[(String, String)],
    ) -> Result<CommandResult> {
        let tokens: Vec<String> = args.iter().map(|arg| (*arg).to_string()).collect();
        run_command(
            &tokens,
            &RunOptions {
                extra_env: env,
                cwd: Some(&self.workdir),
                stdin: Some(input),
                ..RunOptions::default()
            },
        )
    }
}

fn ensure_trailing_newline(diff_text: &str) -> String {
    if diff_text.ends_with('\n') {
        diff_text.to_string()
    } else {
        format!("{diff_text}\n")
    }
}

/// `patch` must not leave `.orig` files behind unless the user asked for them.
fn patch_env() -> Vec<(String, String)> {
    if std::env::var_os("PATCH_CREATE_BACKUP").is_some() {
        return Vec::new();
    }
    vec![("PATCH_CREATE_BACKUP".to_string(), "no".to_string())]
}

fn print_trimmed(text: &str) {
    let trimmed = text.trim_end();
    if !trimmed.is_empty() {
        println!("{trimmed}");
    }
}
