//! Post-success bookkeeping: staging, commit message suggestion, commit and push.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::error::Abort;
use crate::io::approval::Approver;
use crate::io::llm::LlmClient;
use crate::io::prompt::CommitPromptInputs;
use crate::session::RepairSession;

pub const COMMIT_DESCRIPTION: &str = "commit message suggestion";
pub const COMMIT_SUMMARY_MAX_LENGTH: usize = 90;

const META_PREFIXES: [&str; 6] = ["now i ", "i ", "here is", "here's", "the diff", "this diff"];
const PROMPT_PHRASES: [&str; 2] = ["your commit", "the diff shows"];

static COMMIT_MESSAGE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:the|this|your|our)\s+commit message\b")
        .expect("commit message reference regex")
});

/// Summary line plus the body lines under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub summary: String,
    pub body: Vec<String>,
}

impl CommitMessage {
    /// Split a raw response into summary and body. `None` when it is blank.
    pub fn parse(response: &str) -> Option<Self> {
        let mut lines = response.trim().lines().map(str::trim_end);
        let summary = lines.next()?.trim().to_string();
        let body: Vec<String> = lines
            .skip_while(|line| line.trim().is_empty())
            .map(str::to_string)
            .collect();
        Some(Self { summary, body })
    }

    pub fn body_text(&self) -> String {
        self.body.join("\n").trim().to_string()
    }
}

/// Stage, describe and optionally push the repaired working tree.
///
/// `git_remote` is the push target for auto-push runs (normally `$GIT_REMOTE`).
#[instrument(skip_all)]
pub fn finalize_worktree<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
    git_remote: Option<&str>,
) -> Result<(), Abort> {
    let ctx = session.ctx;
    let workflow = &ctx.options.workflow;
    let limits = ctx.config.diff_limits();

    let unstaged = session.git.diff_limited(false, limits)?;
    let mut staged = session.git.diff_limited(true, limits)?;
    if unstaged.is_empty() && staged.is_empty() {
        println!("[info] Working tree clean. Nothing to stage or commit.");
        return Ok(());
    }

    if workflow.auto_stage {
        println!("[info] Staging all changes (`git add -A`).");
        session.git.add_all()?;
        staged = session.git.diff_limited(true, limits)?;
    }
    if staged.is_empty() {
        eprintln!(
            "[warn] No staged changes detected. Stage files before requesting a commit message."
        );
        return Ok(());
    }

    let message = if workflow.commit_message {
        let message = request_commit_message(session, &staged, workflow.auto_push)?;
        print_suggestion(&message);
        Some(message)
    } else {
        None
    };

    if workflow.auto_push {
        let message = message.ok_or_else(|| Abort::CommitMessage {
            detail: "a commit summary is required for auto-push".to_string(),
        })?;
        commit_and_push(session, &message, git_remote)?;
    } else if message.is_some() {
        println!("[info] Commit message ready; run `git commit` manually if desired.");
    }
    Ok(())
}

/// Ask the LLM for a commit message, retrying once when the summary breaks the rules.
pub fn request_commit_message<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
    staged_diff: &str,
    detailed: bool,
) -> Result<CommitMessage, Abort> {
    let ctx = session.ctx;
    let mut inputs = CommitPromptInputs {
        model: &ctx.options.model.name,
        reasoning_effort: ctx.options.model.reasoning_effort.as_str(),
        staged_diff,
        extra_context: &ctx.args.commit_extra_context,
        detailed,
        invalid_reason: None,
    };

    let message = invoke_commit_prompt(session, &inputs)?;
    let Some(issue) = commit_summary_issue(&message.summary) else {
        return Ok(message);
    };
    info!(%issue, "commit summary rejected, retrying once");

    inputs.invalid_reason = Some(issue.as_str());
    let message = invoke_commit_prompt(session, &inputs)?;
    match commit_summary_issue(&message.summary) {
        None => Ok(message),
        Some(reason) => Err(Abort::CommitMessage {
            detail: format!("invalid response ({reason})"),
        }),
    }
}

fn invoke_commit_prompt<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
    inputs: &CommitPromptInputs<'_>,
) -> Result<CommitMessage, Abort> {
    let prompt = session.prompts.render_commit(inputs)?;
    let response = session
        .llm
        .invoke(&prompt, COMMIT_DESCRIPTION)
        .map_err(|err| Abort::CommitMessage {
            detail: format!("{err:#}"),
        })?;
    CommitMessage::parse(&response).ok_or_else(|| Abort::CommitMessage {
        detail: "LLM returned an empty commit message".to_string(),
    })
}

/// First rule the summary breaks, as a sentence the LLM can act on.
pub fn commit_summary_issue(summary: &str) -> Option<String> {
    let trimmed = summary.trim();
    if trimmed.is_empty() {
        return Some("Commit summary was blank.".to_string());
    }
    let length = trimmed.chars().count();
    if length > COMMIT_SUMMARY_MAX_LENGTH {
        return Some(format!(
            "Commit summary exceeded {COMMIT_SUMMARY_MAX_LENGTH} characters ({length})."
        ));
    }
    if trimmed.contains(". ") {
        return Some("Commit summary contained multiple sentences; use one concise line.".to_string());
    }
    if trimmed.ends_with(['.', '!', '?']) {
        return Some("Commit summary must not end with punctuation.".to_string());
    }

    let lowered = trimmed.to_lowercase();
    if META_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
        return Some(
            "Commit summary used meta commentary instead of describing the change.".to_string(),
        );
    }
    if COMMIT_MESSAGE_REFERENCE.is_match(&lowered)
        || PROMPT_PHRASES.iter().any(|phrase| lowered.contains(phrase))
    {
        return Some("Commit summary referenced the prompt instead of the change.".to_string());
    }
    None
}

fn print_suggestion(message: &CommitMessage) {
    println!("[info] Suggested commit message:");
    println!("    {}", message.summary);
    if !message.body.is_empty() {
        println!();
        for line in &message.body {
            if line.is_empty() {
                println!();
            } else {
                println!("    {line}");
            }
        }
    }
}

fn commit_and_push<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
    message: &CommitMessage,
    git_remote: Option<&str>,
) -> Result<(), Abort> {
    println!("[info] Creating commit...");
    session
        .git
        .commit(&message.summary, &message.body_text())
        .map_err(|err| git_failure("commit", err))?;

    let remote = git_remote
        .map(str::trim)
        .filter(|remote| !remote.is_empty())
        .ok_or_else(|| Abort::GitCommand {
            detail: "GIT_REMOTE is not set; cannot push".to_string(),
        })?;
    let branch = session
        .git
        .current_branch()
        .map_err(|err| git_failure("rev-parse", err))?;
    println!("[info] Pushing to {remote}/{branch}...");
    session
        .git
        .push(remote, &branch)
        .map_err(|err| git_failure("push", err))?;
    debug!(remote, %branch, "pushed");
    Ok(())
}

fn git_failure(step: &str, err: anyhow::Error) -> Abort {
    warn!(step, err = %format!("{err:#}"), "git step failed");
    Abort::GitCommand {
        detail: format!("git {step}: {err:#}"),
    }
}
