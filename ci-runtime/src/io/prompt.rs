//! Prompt rendering for patch and commit-message requests.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::PatchPrompt;

const PATCH_TEMPLATE: &str = include_str!("prompts/patch.md");
const COMMIT_TEMPLATE: &str = include_str!("prompts/commit.md");

/// Previous errors longer than this are cut before they reach a prompt.
pub const PREVIOUS_ERROR_LIMIT: usize = 2000;

/// Inputs for a commit-message request.
#[derive(Debug, Clone, Default)]
pub struct CommitPromptInputs<'a> {
    pub model: &'a str,
    pub reasoning_effort: &'a str,
    pub staged_diff: &'a str,
    pub extra_context: &'a str,
    /// Ask for a subject plus bullet body instead of a single line.
    pub detailed: bool,
    /// Why the previous answer was rejected, when retrying.
    pub invalid_reason: Option<&'a str>,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("patch", PATCH_TEMPLATE)
            .context("load patch template")?;
        env.add_template("commit", COMMIT_TEMPLATE)
            .context("load commit template")?;
        Ok(Self { env })
    }

    pub fn render_patch<S: AsRef<str>>(
        &self,
        prompt: &PatchPrompt<'_>,
        repo_context: &str,
        protected_paths: &[S],
    ) -> Result<String> {
        let failure = prompt.failure_context;
        let protected: Vec<&str> = protected_paths.iter().map(AsRef::as_ref).collect();
        let template = self.env.get_template("patch")?;
        let rendered = template.render(context! {
            repo_context => repo_context.trim(),
            command => prompt.command,
            iteration => prompt.iteration,
            attempt => prompt.attempt,
            git_status => or_placeholder(&prompt.working_tree_status, "(clean)"),
            summary => or_placeholder(&failure.summary, "(not detected)"),
            focused_diff => or_placeholder(&failure.focused_diff, "/* no focused diff */"),
            git_diff => or_placeholder(&prompt.working_tree_diff, "/* no diff */"),
            log_excerpt => failure.log_excerpt.as_str(),
            previous_error => truncate_error(prompt.previous_patch_error.as_deref(), PREVIOUS_ERROR_LIMIT),
            protected_paths => protected,
        })?;
        Ok(rendered.trim_start().to_string())
    }

    pub fn render_commit(&self, input: &CommitPromptInputs<'_>) -> Result<String> {
        let template = self.env.get_template("commit")?;
        let rendered = template.render(context! {
            model => input.model,
            reasoning_effort => input.reasoning_effort,
            staged_diff => or_placeholder(input.staged_diff, "/* no staged diff */"),
            detailed => input.detailed,
            extra_context => input.extra_context.trim(),
            invalid_reason => input.invalid_reason,
        })?;
        Ok(rendered.trim().to_string())
    }
}

/// Shorten an error for inclusion in a prompt; `(none)` when there is none.
pub fn truncate_error(error: Option<&str>, limit: usize) -> String {
    let text = error.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return "(none)".to_string();
    }
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...(truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

fn or_placeholder<'a>(text: &'a str, placeholder: &'a str) -> &'a str {
    if text.is_empty() { placeholder } else { text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailureContext;

    fn failure(summary: &str, focused_diff: &str) -> FailureContext {
        FailureContext {
            log_excerpt: "E   assert 1 == 2".to_string(),
            summary: summary.to_string(),
            implicated_files: Vec::new(),
            focused_diff: focused_diff.to_string(),
            coverage_report: None,
        }
    }

    #[test]
    fn truncates_long_errors() {
        assert_eq!(truncate_error(None, 10), "(none)");
        assert_eq!(truncate_error(Some("   "), 10), "(none)");
        assert_eq!(truncate_error(Some(" short "), 10), "short");
        let long = "x".repeat(2500);
        let cut = truncate_error(Some(&long), PREVIOUS_ERROR_LIMIT);
        assert_eq!(cut.len(), PREVIOUS_ERROR_LIMIT + "...(truncated)".len());
        assert!(cut.ends_with("...(truncated)"));
    }

    #[test]
    fn patch_prompt_uses_placeholders_for_empty_fields() {
        let engine = PromptEngine::new().expect("engine");
        let ctx = failure("", "");
        let prompt = PatchPrompt {
            command: "./scripts/ci.sh",
            failure_context: &ctx,
            working_tree_diff: String::new(),
            working_tree_status: String::new(),
            iteration: 2,
            previous_patch_error: None,
            attempt: 3,
        };
        let text = engine
            .render_patch(&prompt, "Repo facts.", &["ci_tools/", "Makefile"])
            .expect("render");
        assert!(text.starts_with("Repo facts."));
        assert!(text.contains("- CI command: `./scripts/ci.sh`"));
        assert!(text.contains("- Iteration: 2\n- Patch attempt: 3"));
        assert!(text.contains("(clean)"));
        assert!(text.contains("(not detected)"));
        assert!(text.contains("/* no focused diff */"));
        assert!(text.contains("/* no diff */"));
        assert!(text.contains("Previous patch apply error:\n(none)"));
        assert!(text.contains("E   assert 1 == 2"));
        assert!(text.contains("(ci_tools/, Makefile)"));
    }

    #[test]
    fn patch_prompt_includes_previous_error_and_diffs() {
        let engine = PromptEngine::new().expect("engine");
        let ctx = failure("type checker reported errors:\n- src/a.py:3", "diff --git a/src/a.py b/src/a.py");
        let prompt = PatchPrompt {
            command: "make test",
            failure_context: &ctx,
            working_tree_diff: "diff --git a/x b/x".to_string(),
            working_tree_status: "M src/a.py".to_string(),
            iteration: 1,
            previous_patch_error: Some("Duplicate patch received".to_string()),
            attempt: 2,
        };
        let text = engine
            .render_patch(&prompt, "", &[] as &[&str])
            .expect("render");
        assert!(text.contains("- src/a.py:3"));
        assert!(text.contains("M src/a.py"));
        assert!(text.contains("Previous patch apply error:\nDuplicate patch received"));
        assert!(!text.contains("automation scaffolding"));
    }

    #[test]
    fn commit_prompt_switches_on_detail_and_retry() {
        let engine = PromptEngine::new().expect("engine");
        let brief = engine
            .render_commit(&CommitPromptInputs {
                model: "gpt-5-codex",
                reasoning_effort: "high",
                staged_diff: "",
                ..CommitPromptInputs::default()
            })
            .expect("render");
        assert!(brief.contains("/* no staged diff */"));
        assert!(brief.contains("single-line commit message"));
        assert!(!brief.contains("previous response was rejected"));

        let retry = engine
            .render_commit(&CommitPromptInputs {
                model: "gpt-5-codex",
                reasoning_effort: "high",
                staged_diff: "diff --git a/x b/x",
                extra_context: "Mention the ticket.",
                detailed: true,
                invalid_reason: Some("Commit summary was blank."),
            })
            .expect("render");
        assert!(retry.contains("bullet points"));
        assert!(retry.contains("Mention the ticket."));
        assert!(retry.contains("(Commit summary was blank.)"));
        assert!(retry.ends_with("Respond with only the commit subject and bullet list."));
    }
}
