//! Typed failure kinds for the repair loop.
//!
//! Infrastructure helpers return `anyhow::Result`. Everything that must be
//! matched on (abort kinds, retryable apply failures, LLM CLI exits) is a
//! concrete type here so callers can branch on it or `downcast_ref` it.

use thiserror::Error;

use crate::exit_codes;

/// Terminal outcome of the repair workflow.
///
/// Each variant unwinds straight to the top-level handler, which prints the
/// message once and exits with [`Abort::exit_code`].
#[derive(Debug, Error)]
pub enum Abort {
    /// The outer iteration budget or the attempt ceiling was reached.
    #[error("unable to obtain a valid patch after multiple attempts")]
    AttemptsExhausted,
    /// A failure at the attempt ceiling could not be absorbed by the extra retry budget.
    #[error("patches failed after exhausting retries; manual review required")]
    RetriesExhausted,
    /// The LLM responded without a usable diff (empty or `NOOP`).
    #[error("LLM returned an empty or NOOP patch response")]
    MissingPatch,
    /// The operator quit from the approval prompt.
    #[error("user declined CI automation")]
    UserDeclined,
    /// The failure is not something a diff-level fix should address.
    #[error("Manual intervention required")]
    ManualIntervention { hint: String },
    #[error("Received Ctrl-C")]
    Interrupted,
    #[error("Git command failed: {detail}")]
    GitCommand { detail: String },
    #[error("Commit message generation failed: {detail}")]
    CommitMessage { detail: String },
    #[error("Unsupported model configuration: {detail}")]
    ModelSelection { detail: String },
    /// Command line, env file or repository config could not be used.
    #[error("Invalid configuration: {detail}")]
    InvalidConfig { detail: String },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Abort {
    pub fn exit_code(&self) -> i32 {
        match self {
            Abort::ManualIntervention { .. } => exit_codes::MANUAL_INTERVENTION,
            Abort::Interrupted => exit_codes::INTERRUPTED,
            Abort::ModelSelection { .. } | Abort::InvalidConfig { .. } => exit_codes::INVALID,
            Abort::AttemptsExhausted
            | Abort::RetriesExhausted
            | Abort::MissingPatch
            | Abort::UserDeclined
            | Abort::GitCommand { .. }
            | Abort::CommitMessage { .. }
            | Abort::Internal(_) => exit_codes::ABORTED,
        }
    }
}

/// Failure applying a diff with either patch backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Patch application failed: {detail}")]
pub struct PatchApplyError {
    pub detail: String,
    /// Whether the patch cycle may spend retry budget on this failure.
    pub retryable: bool,
}

impl PatchApplyError {
    pub fn git_apply_failed(output: &str) -> Self {
        Self {
            detail: format!("`git apply` failed: {}", or_placeholder(output, "(no output)")),
            retryable: true,
        }
    }

    pub fn preflight_failed(check_output: &str, dry_output: &str) -> Self {
        Self {
            detail: format!(
                "Patch dry-run failed.\ngit apply --check output:\n{}\n\npatch --dry-run output:\n{}",
                or_placeholder(check_output, "(none)"),
                or_placeholder(dry_output, "(none)")
            ),
            retryable: true,
        }
    }

    pub fn patch_exit(exit_code: i32, output: &str) -> Self {
        Self {
            detail: format!(
                "`patch` exited with status {exit_code}: {}",
                or_placeholder(output, "(no output)")
            ),
            retryable: true,
        }
    }
}

/// The LLM CLI exited with a non-zero status.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("LLM CLI command failed: exit status {exit_code} ({})", or_placeholder(.output, "(no output)"))]
pub struct CliInvocationError {
    pub exit_code: i32,
    pub output: String,
}

/// A command run with `check = true` exited non-zero.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("`{program}` exited with status {exit_code}")]
pub struct CommandFailed {
    pub program: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandFailed {
    /// First non-empty stream, trimmed.
    pub fn output(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

fn or_placeholder<'a>(text: &'a str, placeholder: &'a str) -> &'a str {
    let trimmed = text.trim();
    if trimmed.is_empty() { placeholder } else { trimmed }
}
