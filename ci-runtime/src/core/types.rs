//! Value records shared by the repair loop.
//!
//! These are built once and read afterwards. The only mutable piece of
//! repair state lives in [`crate::core::attempts::PatchAttemptState`].

use serde::Serialize;

/// Captured output from a completed child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// A module whose coverage fell below the configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageDeficit {
    pub path: String,
    pub coverage_percent: f64,
}

/// Coverage table found in command output with at least one deficit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageCheckResult {
    pub table_text: String,
    pub deficits: Vec<CoverageDeficit>,
    pub threshold: f64,
}

/// Summary of the most recent failure, handed to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureContext {
    pub log_excerpt: String,
    pub summary: String,
    pub implicated_files: Vec<String>,
    pub focused_diff: String,
    pub coverage_report: Option<CoverageCheckResult>,
}

/// Everything needed to render one patch request.
#[derive(Debug, Clone, Serialize)]
pub struct PatchPrompt<'a> {
    pub command: &'a str,
    pub failure_context: &'a FailureContext,
    pub working_tree_diff: String,
    pub working_tree_status: String,
    pub iteration: u32,
    pub previous_patch_error: Option<String>,
    pub attempt: u32,
}
