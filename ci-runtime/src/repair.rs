//! The outer run-and-repair loop.

use std::collections::HashSet;

use tracing::{info, instrument};

use crate::core::coverage::extract_coverage_deficits;
use crate::core::types::CommandResult;
use crate::diagnose::build_failure_context;
use crate::error::Abort;
use crate::io::approval::Approver;
use crate::io::interrupt;
use crate::io::llm::LlmClient;
use crate::io::process::{RunOptions, run_command};
use crate::options::RunContext;
use crate::patch_cycle::request_and_apply;
use crate::session::RepairSession;

/// Run the CI command until it passes with adequate coverage.
///
/// Each failing iteration gets one patch cycle. Returns
/// [`Abort::AttemptsExhausted`] when `max_iterations` runs out.
#[instrument(skip_all, fields(max_iterations = session.ctx.args.max_iterations))]
pub fn run_repair_iterations<L: LlmClient, A: Approver>(
    session: &RepairSession<'_, L, A>,
) -> Result<(), Abort> {
    let ctx = session.ctx;
    let mut seen_patches: HashSet<String> = HashSet::new();

    for iteration in 1..=ctx.args.max_iterations {
        interrupt::check()?;
        println!(
            "[loop] Iteration {iteration} - running `{}`",
            ctx.args.command
        );
        let result = run_ci_command(ctx)?;
        interrupt::check()?;

        let coverage_report = if result.succeeded() {
            extract_coverage_deficits(&result.combined_output(), ctx.config.coverage_threshold)
        } else {
            None
        };
        if result.succeeded() && coverage_report.is_none() {
            println!("[loop] CI command succeeded on iteration {iteration}.");
            info!(iteration, "command passed");
            return Ok(());
        }

        let failure = build_failure_context(
            &session.git,
            &ctx.root,
            ctx.args.log_tail,
            &result,
            coverage_report,
        )?;
        request_and_apply(session, &failure, iteration, &mut seen_patches)?;
    }

    Err(Abort::AttemptsExhausted)
}

/// Run the command once, live, without contacting the LLM.
pub fn perform_dry_run(ctx: &RunContext) -> Result<i32, Abort> {
    println!("[info] Dry run: executing CI command once without invoking the LLM.");
    let result = run_ci_command(ctx)?;
    interrupt::check()?;
    Ok(result.exit_code)
}

fn run_ci_command(ctx: &RunContext) -> Result<CommandResult, Abort> {
    let result = run_command(
        &ctx.options.command.tokens,
        &RunOptions {
            stream_live: true,
            extra_env: &ctx.options.command.env,
            cwd: Some(&ctx.root),
            ..RunOptions::default()
        },
    )?;
    Ok(result)
}
