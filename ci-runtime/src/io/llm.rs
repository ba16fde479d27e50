//! LLM CLI abstraction.
//!
//! The [`LlmClient`] trait decouples the repair loop from the actual backend
//! (`codex exec` or `claude -p`). Tests use scripted clients that return
//! canned responses without spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::error::{Abort, CliInvocationError};
use crate::io::interaction_log::InteractionLog;
use crate::io::process::{RunOptions, run_command};
use crate::options::{ModelConfig, ReasoningEffort};

const ASSISTANT_ENVELOPE: &str = "assistant:";

/// Abstraction over LLM backends.
pub trait LlmClient {
    /// Send `prompt` and return the response text. `description` labels the
    /// interaction in the audit log.
    fn invoke(&self, prompt: &str, description: &str) -> Result<String>;
}

/// Which CLI binary to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliKind {
    Codex,
    Claude,
}

impl CliKind {
    /// Pick a CLI from `CI_CLI_TYPE`, the model name, or `ANTHROPIC_API_KEY`.
    pub fn from_env(model: &str) -> Result<Self, Abort> {
        let cli_type = std::env::var("CI_CLI_TYPE").ok();
        let anthropic_key = std::env::var("ANTHROPIC_API_KEY").is_ok_and(|key| !key.is_empty());
        Self::detect(model, cli_type.as_deref(), anthropic_key)
    }

    pub fn detect(
        model: &str,
        cli_type: Option<&str>,
        anthropic_key_set: bool,
    ) -> Result<Self, Abort> {
        match cli_type.map(str::to_ascii_lowercase).as_deref() {
            Some("claude") => return Ok(Self::Claude),
            Some("codex") => return Ok(Self::Codex),
            _ => {}
        }
        if model.starts_with("claude") || anthropic_key_set {
            return Ok(Self::Claude);
        }
        Err(Abort::ModelSelection {
            detail: "CI_CLI_TYPE must be set to 'claude' or 'codex', or ANTHROPIC_API_KEY must be set"
                .to_string(),
        })
    }

    /// Argument vector for one invocation; the prompt is read from stdin (`-`).
    pub fn command(self, model: &str, reasoning_effort: ReasoningEffort) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        match self {
            Self::Claude => {
                tokens.push("claude".to_string());
                // The Claude CLI keeps its own default unless a Claude model is named.
                if model.starts_with("claude") {
                    tokens.extend(["--model".to_string(), model.to_string()]);
                }
                tokens.extend(["-p".to_string(), "-".to_string()]);
            }
            Self::Codex => {
                tokens.extend(["codex", "exec", "--model"].map(str::to_string));
                tokens.push(model.to_string());
                tokens.push("-c".to_string());
                tokens.push(format!("model_reasoning_effort={}", reasoning_effort.as_str()));
                tokens.push("-".to_string());
            }
        }
        tokens
    }
}

/// Client that spawns the selected CLI once per request.
#[derive(Debug, Clone)]
pub struct CliLlm {
    kind: CliKind,
    model: ModelConfig,
    workdir: PathBuf,
    timeout: Duration,
    log: InteractionLog,
}

impl CliLlm {
    pub fn new(
        kind: CliKind,
        model: ModelConfig,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
        log: InteractionLog,
    ) -> Self {
        Self {
            kind,
            model,
            workdir: workdir.into(),
            timeout,
            log,
        }
    }
}

impl LlmClient for CliLlm {
    #[instrument(skip_all, fields(kind = ?self.kind, description))]
    fn invoke(&self, prompt: &str, description: &str) -> Result<String> {
        let tokens = self
            .kind
            .command(&self.model.name, self.model.reasoning_effort);
        info!(program = %tokens[0], "invoking LLM CLI");
        let result = run_command(
            &tokens,
            &RunOptions {
                cwd: Some(&self.workdir),
                stdin: Some(prompt.as_bytes()),
                timeout: Some(self.timeout),
                ..RunOptions::default()
            },
        )
        .with_context(|| format!("run {}", tokens[0]))?;

        let stdout = result.stdout.trim();
        let stderr = result.stderr.trim();
        self.log
            .append(description, prompt, if stdout.is_empty() { stderr } else { stdout })?;

        if !result.succeeded() {
            warn!(exit_code = result.exit_code, "LLM CLI failed");
            let output = if stderr.is_empty() { stdout } else { stderr };
            return Err(CliInvocationError {
                exit_code: result.exit_code,
                output: output.to_string(),
            }
            .into());
        }

        let response = parse_response(stdout, stderr);
        debug!(response_len = response.len(), "LLM CLI completed");
        Ok(response)
    }
}

/// Strip an `assistant:` envelope line; an empty stdout falls back to stderr.
pub fn parse_response(stdout: &str, stderr: &str) -> String {
    let mut text = stdout.trim();
    if text.starts_with(ASSISTANT_ENVELOPE) {
        text = text.split_once('\n').map_or("", |(_, rest)| rest).trim();
    }
    if text.is_empty() {
        stderr.trim().to_string()
    } else {
        text.to_string()
    }
}
