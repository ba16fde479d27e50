//! Command-line arguments and the run context derived from them.
//!
//! Everything here is resolved once at startup and read-only afterwards.

use std::env;
use std::path::{Path, PathBuf};

use clap::{Args, ValueEnum};
use tracing::{debug, info, warn};

use crate::error::Abort;
use crate::io::approval::ApprovalMode;
use crate::io::config::{CiConfig, load_config};
use crate::io::git::Git;

pub const DEFAULT_COMMAND: &str = "./scripts/ci.sh";
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
pub const DEFAULT_LOG_TAIL: usize = 200;
pub const DEFAULT_MODEL: &str = "gpt-5-codex";
pub const DEFAULT_MAX_PATCH_LINES: usize = 1500;
pub const DEFAULT_ENV_FILE: &str = "~/.env";
pub const DEFAULT_PATCH_RETRIES: u32 = 1;

/// Command basename that turns on automation mode.
const AUTOMATION_SCRIPT: &str = "ci.sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Flags accepted by the binary.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Command to run for CI.
    #[arg(long, default_value = DEFAULT_COMMAND)]
    pub command: String,

    /// Maximum number of run-and-repair iterations.
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_iterations: u32,

    /// Lines of failure output sent to the LLM.
    #[arg(long, default_value_t = DEFAULT_LOG_TAIL)]
    pub log_tail: usize,

    /// LLM model name (falls back to OPENAI_MODEL, then gpt-5-codex).
    #[arg(long)]
    pub model: Option<String>,

    /// Reasoning effort hint (falls back to OPENAI_REASONING_EFFORT, then high).
    #[arg(long, value_enum)]
    pub reasoning_effort: Option<ReasoningEffort>,

    /// Reject patches that change more lines than this.
    #[arg(long, default_value_t = DEFAULT_MAX_PATCH_LINES)]
    pub max_patch_lines: usize,

    /// Whether patch application requires approval.
    #[arg(long, value_enum, default_value_t = ApprovalMode::Prompt)]
    pub patch_approval_mode: ApprovalMode,

    /// After CI passes, run `git add -A` before asking for a commit message.
    #[arg(long)]
    pub auto_stage: bool,

    /// Request a commit message from the LLM after CI succeeds.
    #[arg(long)]
    pub commit_message: bool,

    /// Additional instructions for the commit message prompt.
    #[arg(long, default_value = "")]
    pub commit_extra_context: String,

    /// Run the CI command once and exit without contacting the LLM.
    #[arg(long)]
    pub dry_run: bool,

    /// Dotenv file loaded before resolving model settings.
    #[arg(long, default_value = DEFAULT_ENV_FILE)]
    pub env_file: String,

    /// Additional patch attempts per iteration when a patch is rejected or fails to apply.
    #[arg(long, default_value_t = DEFAULT_PATCH_RETRIES)]
    pub patch_retries: u32,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            log_tail: DEFAULT_LOG_TAIL,
            model: None,
            reasoning_effort: None,
            max_patch_lines: DEFAULT_MAX_PATCH_LINES,
            patch_approval_mode: ApprovalMode::Prompt,
            auto_stage: false,
            commit_message: false,
            commit_extra_context: String::new(),
            dry_run: false,
            env_file: DEFAULT_ENV_FILE.to_string(),
            patch_retries: DEFAULT_PATCH_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    pub tokens: Vec<String>,
    /// Merged over the inherited environment when the command runs.
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub approval_mode: ApprovalMode,
    pub automation_mode: bool,
    pub auto_stage: bool,
    pub commit_message: bool,
    pub auto_push: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub name: String,
    pub reasoning_effort: ReasoningEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub command: CommandConfig,
    pub workflow: WorkflowConfig,
    pub model: ModelConfig,
}

/// Load the dotenv file, then derive [`RuntimeOptions`] from `args`.
pub fn configure_runtime(args: &RunArgs) -> Result<RuntimeOptions, Abort> {
    load_env_file(&args.env_file)?;

    let tokens = shell_words::split(&args.command).map_err(|err| Abort::InvalidConfig {
        detail: format!("cannot parse --command `{}`: {err}", args.command),
    })?;
    if tokens.is_empty() {
        return Err(Abort::InvalidConfig {
            detail: "--command must not be empty".to_string(),
        });
    }

    let model = ModelConfig {
        name: resolve_model(args.model.as_deref(), env::var("OPENAI_MODEL").ok().as_deref()),
        reasoning_effort: resolve_reasoning_effort(
            args.reasoning_effort,
            env::var("OPENAI_REASONING_EFFORT").ok().as_deref(),
        )?,
    };

    let automation_mode = is_automation_command(&tokens);
    let env = if automation_mode {
        vec![("CI_AUTOMATION".to_string(), "1".to_string())]
    } else {
        Vec::new()
    };
    let workflow = WorkflowConfig {
        approval_mode: args.patch_approval_mode,
        automation_mode,
        auto_stage: args.auto_stage || automation_mode,
        commit_message: args.commit_message || automation_mode,
        auto_push: automation_mode,
    };
    debug!(?workflow, model = %model.name, "configured runtime");

    Ok(RuntimeOptions {
        command: CommandConfig { tokens, env },
        workflow,
        model,
    })
}

pub fn resolve_model(arg: Option<&str>, env_value: Option<&str>) -> String {
    arg.into_iter()
        .chain(env_value)
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}

pub fn resolve_reasoning_effort(
    arg: Option<ReasoningEffort>,
    env_value: Option<&str>,
) -> Result<ReasoningEffort, Abort> {
    if let Some(effort) = arg {
        return Ok(effort);
    }
    match env_value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(ReasoningEffort::High),
        Some(value) => ReasoningEffort::parse(value).ok_or_else(|| Abort::ModelSelection {
            detail: format!(
                "reasoning effort `{value}` is not one of low, medium, high (from OPENAI_REASONING_EFFORT)"
            ),
        }),
    }
}

fn is_automation_command(tokens: &[String]) -> bool {
    tokens
        .first()
        .and_then(|program| Path::new(program).file_name())
        .is_some_and(|name| name == AUTOMATION_SCRIPT)
}

/// Values from the file never override variables already set.
fn load_env_file(raw_path: &str) -> Result<(), Abort> {
    let path = expand_home(raw_path);
    if !path.is_file() {
        debug!(path = %path.display(), "env file not found, skipping");
        return Ok(());
    }
    match dotenvy::from_path(&path) {
        Ok(()) => {
            info!(path = %path.display(), "loaded env file");
            Ok(())
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to parse env file");
            Err(Abort::InvalidConfig {
                detail: format!("cannot load env file {}: {err}", path.display()),
            })
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Everything the orchestrators read: repository root, repository config,
/// the raw arguments and the options derived from them.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub root: PathBuf,
    pub config: CiConfig,
    pub args: RunArgs,
    pub options: RuntimeOptions,
}

impl RunContext {
    /// Resolve the repository root from the current directory and load its config.
    pub fn load(args: RunArgs) -> Result<Self, Abort> {
        let cwd = env::current_dir().map_err(|err| Abort::InvalidConfig {
            detail: format!("cannot read current directory: {err}"),
        })?;
        let root = Git::show_toplevel(&cwd).unwrap_or(cwd);
        Self::for_root(root, args)
    }

    pub fn for_root(root: PathBuf, args: RunArgs) -> Result<Self, Abort> {
        let config = load_config(&root).map_err(|err| Abort::InvalidConfig {
            detail: format!("{err:#}"),
        })?;
        let options = configure_runtime(&args)?;
        Ok(Self {
            root,
            config,
            args,
            options,
        })
    }

    /// Attempt ceiling for one iteration's patch cycle.
    pub fn max_patch_attempts(&self) -> u32 {
        self.args.patch_retries.saturating_add(1)
    }
}
