//! Request, validate, approve and apply patches for one failing iteration.

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use crate::core::attempts::PatchAttemptState;
use crate::core::diff::{extract_diff, has_diff_header, patch_looks_risky};
use crate::core::types::{FailureContext, PatchPrompt};
use crate::error::{Abort, CliInvocationError, PatchApplyError};
use crate::io::approval::{Approval, ApprovalMode, Approver};
use crate::io::interrupt;
use crate::io::llm::LlmClient;
use crate::session::RepairSession;

pub const PATCH_DESCRIPTION: &str = "patch suggestion";

const DUPLICATE_PATCH: &str = "Duplicate patch received; provide an alternative diff.";
const MISSING_HEADERS: &str = "Patch missing unified diff headers (diff --git/---/+++ lines).";
const FAILED_SAFETY: &str = "Patch failed safety checks.";
const USER_DECLINED: &str = "User declined to apply the patch.";

/// Loop until a patch applies cleanly or the attempt budget runs out.
///
/// `seen_patches` spans the whole repair session, so a diff accepted in an
/// earlier iteration is rejected as a duplicate here.
#[instrument(skip_all, fields(iteration))]
pub fn request_and_apply<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
    failure: &FailureContext,
    iteration: u32,
    seen_patches: &mut HashSet<String>,
) -> Result<(), Abort> {
    let ctx = session.ctx;
    let mut state = PatchAttemptState::new(ctx.max_patch_attempts());

    loop {
        state.ensure_within_budget()?;
        interrupt::check()?;
        let attempt = state.current_attempt();
        println!("[codex] Requesting patch attempt {attempt}...");

        let prompt = PatchPrompt {
            command: &ctx.args.command,
            failure_context: failure,
            working_tree_diff: session.git.diff_limited(false, ctx.config.diff_limits())?,
            working_tree_status: session.git.status_short()?,
            iteration,
            previous_patch_error: state.last_error().map(str::to_string),
            attempt,
        };
        let prompt_text = session.prompts.render_patch(
            &prompt,
            &ctx.config.repo_context,
            &ctx.config.protected_path_prefixes,
        )?;

        let response = match session.llm.invoke(&prompt_text, PATCH_DESCRIPTION) {
            Ok(response) => response,
            Err(err) => {
                interrupt::check()?;
                let Some(cli_err) = err.downcast_ref::<CliInvocationError>() else {
                    return Err(err.into());
                };
                warn!(exit_code = cli_err.exit_code, "LLM CLI failed, spending an attempt");
                println!("[warn] {cli_err}");
                state.record_failure(cli_err.to_string(), true)?;
                continue;
            }
        };
        interrupt::check()?;

        let diff_text = extract_diff(&response).ok_or(Abort::MissingPatch)?;

        if let Some(reason) = validate_candidate(
            &diff_text,
            seen_patches,
            ctx.args.max_patch_lines,
            &ctx.config.protected_path_prefixes,
        ) {
            println!("[codex] Rejected patch attempt {attempt}: {reason}");
            state.record_failure(reason, true)?;
            continue;
        }
        seen_patches.insert(diff_text.clone());

        match approve(session, attempt)? {
            Approval::Approved => {}
            Approval::Quit => return Err(Abort::UserDeclined),
            Approval::Declined => {
                state.record_failure(USER_DECLINED, true)?;
                continue;
            }
        }

        match session.applier.apply(&diff_text) {
            Ok(outcome) => {
                debug!(?outcome, "patch applied");
                state.clear_last_error();
                report_post_patch_status(session)?;
                return Ok(());
            }
            Err(err) => match err.downcast_ref::<PatchApplyError>() {
                Some(apply_err) => {
                    println!("[warn] {apply_err}");
                    state.record_failure(apply_err.to_string(), apply_err.retryable)?;
                }
                None => {
                    warn!(err = %format!("{err:#}"), "unexpected apply error");
                    state.record_failure(format!("{err:#}"), false)?;
                }
            },
        }

        if state.last_error().is_none() {
            state.record_failure("Patch application failed", false)?;
        }
    }
}

/// Why a candidate must be rejected before approval, if it must.
fn validate_candidate<S: AsRef<str>>(
    diff_text: &str,
    seen_patches: &HashSet<String>,
    max_patch_lines: usize,
    protected_prefixes: &[S],
) -> Option<String> {
    if seen_patches.contains(diff_text) {
        return Some(DUPLICATE_PATCH.to_string());
    }
    if !has_diff_header(diff_text) {
        return Some(MISSING_HEADERS.to_string());
    }
    let (risky, reason) = patch_looks_risky(diff_text, max_patch_lines, protected_prefixes);
    if risky {
        return Some(reason.unwrap_or_else(|| FAILED_SAFETY.to_string()));
    }
    None
}

fn approve<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
    attempt: u32,
) -> Result<Approval, Abort> {
    match session.ctx.options.workflow.approval_mode {
        ApprovalMode::Auto => {
            println!("[codex] Auto-approving patch attempt {attempt}.");
            Ok(Approval::Approved)
        }
        ApprovalMode::Prompt => {
            let decision =
                settle_decision(session.approver.approve(attempt), interrupt::requested())?;
            info!(?decision, attempt, "operator decision");
            Ok(decision)
        }
    }
}

/// A pending Ctrl-C wins over whatever the prompt returned, including its error.
fn settle_decision(
    decision: anyhow::Result<Approval>,
    interrupted: bool,
) -> Result<Approval, Abort> {
    if interrupted {
        return Err(Abort::Interrupted);
    }
    Ok(decision?)
}

fn report_post_patch_status<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
) -> Result<(), Abort> {
    let status = session.git.status_short()?;
    if status.is_empty() {
        println!("[info] Working tree is clean after applying patch.");
    } else {
        println!("[info] git status after patch:");
        println!("{status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::patch::PatchApplier;
    use crate::options::RunContext;
    use crate::test_support::{ScriptedApprover, ScriptedLlm, TestRepo, fenced};

    const FIX: &str = "diff --git a/src/app.py b/src/app.py\n--- a/src/app.py\n+++ b/src/app.py\n@@ -1 +1 @@\n-x = 1\n+x = 2\n";
    const STALE: &str = "diff --git a/src/app.py b/src/app.py\n--- a/src/app.py\n+++ b/src/app.py\n@@ -1 +1 @@\n-y = 7\n+y = 8\n";

    fn failure() -> FailureContext {
        FailureContext {
            log_excerpt: "E   assert x == 2".to_string(),
            summary: String::new(),
            implicated_files: Vec::new(),
            focused_diff: String::new(),
            coverage_report: None,
        }
    }

    fn auto_context(repo: &TestRepo) -> RunContext {
        repo.context(|args| args.patch_approval_mode = ApprovalMode::Auto)
    }

    #[test]
    fn validation_order_is_duplicate_headers_then_safety() {
        let mut seen = HashSet::new();
        let prefixes = ["Makefile"];
        assert_eq!(validate_candidate(FIX, &seen, 100, &prefixes), None);

        seen.insert(FIX.to_string());
        assert_eq!(
            validate_candidate(FIX, &seen, 100, &prefixes).as_deref(),
            Some(DUPLICATE_PATCH)
        );
        assert_eq!(
            validate_candidate("just prose", &seen, 100, &prefixes).as_deref(),
            Some(MISSING_HEADERS)
        );
        let makefile = "diff --git a/Makefile b/Makefile\n--- a/Makefile\n+++ b/Makefile\n";
        assert!(
            validate_candidate(makefile, &seen, 100, &prefixes)
                .expect("rejected")
                .contains("protected path `Makefile`")
        );
    }

    #[test]
    fn noop_response_aborts_without_spending_budget() {
        let repo = TestRepo::new();
        let ctx = auto_context(&repo);
        let llm = ScriptedLlm::new(["NOOP"]);
        let approver = ScriptedApprover::default();
        let session = RepairSession::new(&ctx, &llm, &approver).expect("session");

        let err = request_and_apply(&session, &failure(), 1, &mut HashSet::new()).unwrap_err();
        assert!(matches!(err, Abort::MissingPatch));
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn applies_first_valid_patch_and_records_it() {
        let repo = TestRepo::new();
        let ctx = auto_context(&repo);
        let llm = ScriptedLlm::new([fenced(FIX)]);
        let approver = ScriptedApprover::default();
        let session = RepairSession::new(&ctx, &llm, &approver).expect("session");
        let mut seen = HashSet::new();

        request_and_apply(&session, &failure(), 1, &mut seen).expect("applied");
        assert_eq!(repo.read("src/app.py"), "x = 2\n");
        assert!(seen.contains(FIX.trim_end()));
        assert_eq!(approver.asked(), 0);
        let prompt = llm.prompt(0);
        assert!(prompt.contains("- Patch attempt: 1"));
        assert!(prompt.contains("Previous patch apply error:\n(none)"));
    }

    #[test]
    fn oversized_patch_is_a_retryable_rejection() {
        let repo = TestRepo::new();
        let ctx = repo.context(|args| {
            args.patch_approval_mode = ApprovalMode::Auto;
            args.max_patch_lines = 1500;
        });
        let mut huge = String::from("diff --git a/src/big.py b/src/big.py\n");
        huge.extend((0..2000).map(|i| format!("+line {i}\n")));
        let llm = ScriptedLlm::new([huge, FIX.to_string()]);
        let approver = ScriptedApprover::default();
        let session = RepairSession::new(&ctx, &llm, &approver).expect("session");

        request_and_apply(&session, &failure(), 1, &mut HashSet::new()).expect("second attempt");
        assert_eq!(llm.calls(), 2);
        let retry_prompt = llm.prompt(1);
        assert!(retry_prompt.contains("- Patch attempt: 2"));
        assert!(retry_prompt.contains("2000 changed lines which exceeds the limit of 1500"));
    }

    #[test]
    fn duplicate_from_earlier_iteration_is_rejected_before_apply() {
        let repo = TestRepo::new();
        let ctx = repo.context(|args| {
            args.patch_approval_mode = ApprovalMode::Auto;
            args.patch_retries = 0;
        });
        let llm = ScriptedLlm::new([FIX]);
        let approver = ScriptedApprover::default();
        let session = RepairSession::new(&ctx, &llm, &approver).expect("session");
        let mut seen = HashSet::from([FIX.to_string()]);

        // Ceiling of one attempt, duplicate is retryable: one extra life, then the script runs dry.
        let err = request_and_apply(&session, &failure(), 2, &mut seen).unwrap_err();
        assert!(matches!(err, Abort::Internal(_)));
        assert_eq!(repo.read("src/app.py"), "x = 1\n");
        assert!(llm.prompt(0).contains("- Iteration: 2"));
    }

    #[test]
    fn operator_quit_aborts_immediately() {
        let repo = TestRepo::new();
        let ctx = repo.context(|_| {});
        let llm = ScriptedLlm::new([FIX]);
        let approver = ScriptedApprover::new([Approval::Quit]);
        let session = RepairSession::new(&ctx, &llm, &approver).expect("session");

        let err = request_and_apply(&session, &failure(), 1, &mut HashSet::new()).unwrap_err();
        assert!(matches!(err, Abort::UserDeclined));
        assert_eq!(repo.read("src/app.py"), "x = 1\n");
    }

    #[test]
    fn interrupted_prompt_error_becomes_interrupt() {
        let prompt_error = anyhow::anyhow!("read patch approval: interrupted");
        let err = settle_decision(Err(prompt_error), true).unwrap_err();
        assert!(matches!(err, Abort::Interrupted));
        assert_eq!(err.exit_code(), crate::exit_codes::INTERRUPTED);

        assert!(matches!(
            settle_decision(Ok(Approval::Approved), true),
            Err(Abort::Interrupted)
        ));
        assert!(matches!(
            settle_decision(Err(anyhow::anyhow!("not a terminal")), false),
            Err(Abort::Internal(_))
        ));
        assert_eq!(
            settle_decision(Ok(Approval::Declined), false).expect("decision"),
            Approval::Declined
        );
    }

    #[test]
    fn operator_decline_spends_an_attempt() {
        let repo = TestRepo::new();
        let ctx = repo.context(|_| {});
        let other_fix = FIX.replace("x = 2", "x = 3");
        let llm = ScriptedLlm::new([FIX.to_string(), other_fix]);
        let approver = ScriptedApprover::new([Approval::Declined, Approval::Approved]);
        let session = RepairSession::new(&ctx, &llm, &approver).expect("session");

        request_and_apply(&session, &failure(), 1, &mut HashSet::new()).expect("applied");
        assert_eq!(repo.read("src/app.py"), "x = 3\n");
        assert_eq!(approver.asked(), 2);
        assert!(llm.prompt(1).contains(USER_DECLINED));
    }

    #[test]
    fn apply_failures_exhaust_the_budget() {
        let repo = TestRepo::new();
        let ctx = repo.context(|args| {
            args.patch_approval_mode = ApprovalMode::Auto;
            args.patch_retries = 0;
        });
        let stale: Vec<String> = (0..4)
            .map(|i| STALE.replace("y = 8", &format!("y = {}", 10 + i)))
            .collect();
        let llm = ScriptedLlm::new(stale);
        let approver = ScriptedApprover::default();
        let session = RepairSession::new(&ctx, &llm, &approver)
            .expect("session")
            .with_applier(PatchApplier::new(repo.path()).with_patch_program("false"));

        let err = request_and_apply(&session, &failure(), 1, &mut HashSet::new()).unwrap_err();
        assert!(matches!(err, Abort::RetriesExhausted));
        // One nominal attempt plus three extra lives.
        assert_eq!(llm.calls(), 4);
        assert!(llm.prompt(3).contains("Patch dry-run failed."));
    }

    #[test]
    fn cli_failure_is_retried_with_its_output() {
        let repo = TestRepo::new();
        let ctx = auto_context(&repo);
        let llm = ScriptedLlm::from_results(vec![
            Err(CliInvocationError {
                exit_code: 7,
                output: "rate limited".to_string(),
            }),
            Ok(FIX.to_string()),
        ]);
        let approver = ScriptedApprover::default();
        let session = RepairSession::new(&ctx, &llm, &approver).expect("session");

        request_and_apply(&session, &failure(), 1, &mut HashSet::new()).expect("applied");
        assert!(llm.prompt(1).contains("exit status 7 (rate limited)"));
    }
}
