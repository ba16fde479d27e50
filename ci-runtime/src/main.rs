//! `ci-runtime` binary: run CI, repair failures with an LLM CLI, then commit.

use std::env;
use std::time::Duration;

use clap::Parser;
use tracing::debug;

use ci_runtime::error::Abort;
use ci_runtime::exit_codes;
use ci_runtime::finalize::finalize_worktree;
use ci_runtime::io::approval::TerminalApprover;
use ci_runtime::io::interaction_log::InteractionLog;
use ci_runtime::io::interrupt;
use ci_runtime::io::llm::{CliKind, CliLlm};
use ci_runtime::logging;
use ci_runtime::options::{RunArgs, RunContext};
use ci_runtime::repair::{perform_dry_run, run_repair_iterations};
use ci_runtime::session::RepairSession;

#[derive(Parser)]
#[command(
    name = "ci-runtime",
    version,
    about = "Run a CI command and repair failures with LLM-generated patches"
)]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    /// Emit diagnostic tracing on stderr (`RUST_LOG` takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let code = match run(cli.run) {
        Ok(code) => code,
        Err(abort) => report(&abort),
    };
    std::process::exit(code);
}

fn run(args: RunArgs) -> Result<i32, Abort> {
    interrupt::install()?;
    let ctx = RunContext::load(args)?;
    debug!(root = %ctx.root.display(), "resolved repository root");

    if ctx.args.dry_run {
        return perform_dry_run(&ctx);
    }

    let kind = CliKind::from_env(&ctx.options.model.name)?;
    let log_dir = env::current_dir()
        .map_err(anyhow::Error::from)?
        .join("logs");
    let llm = CliLlm::new(
        kind,
        ctx.options.model.clone(),
        &ctx.root,
        Duration::from_secs(ctx.config.llm_timeout_secs),
        InteractionLog::new(log_dir),
    );
    let approver = TerminalApprover;
    let session = RepairSession::new(&ctx, &llm, &approver)?;

    run_repair_iterations(&session)?;
    let remote = env::var("GIT_REMOTE").ok();
    finalize_worktree(&session, remote.as_deref())?;
    Ok(exit_codes::OK)
}

fn report(abort: &Abort) -> i32 {
    match abort {
        Abort::Interrupted => println!("\n[info] Received Ctrl-C. Aborting cleanly."),
        Abort::ManualIntervention { hint } => {
            eprintln!("[error] {abort}");
            eprintln!("[error] {hint}");
        }
        Abort::Internal(err) => eprintln!("[error] {err:#}"),
        other => eprintln!("[error] {other}"),
    }
    abort.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci_runtime::io::approval::ApprovalMode;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_documented_flags() {
        let cli = Cli::parse_from(["ci-runtime"]);
        assert_eq!(cli.run.command, "./scripts/ci.sh");
        assert_eq!(cli.run.max_iterations, 5);
        assert_eq!(cli.run.log_tail, 200);
        assert_eq!(cli.run.max_patch_lines, 1500);
        assert_eq!(cli.run.patch_retries, 1);
        assert_eq!(cli.run.patch_approval_mode, ApprovalMode::Prompt);
        assert!(!cli.run.dry_run);
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_repair_flags() {
        let cli = Cli::parse_from([
            "ci-runtime",
            "--command",
            "pytest -q",
            "--patch-approval-mode",
            "auto",
            "--reasoning-effort",
            "low",
            "--commit-message",
            "-v",
        ]);
        assert_eq!(cli.run.command, "pytest -q");
        assert_eq!(cli.run.patch_approval_mode, ApprovalMode::Auto);
        assert!(cli.run.commit_message);
        assert!(cli.verbose);
    }

    #[test]
    fn zero_iterations_is_rejected() {
        assert!(Cli::try_parse_from(["ci-runtime", "--max-iterations", "0"]).is_err());
    }

    #[test]
    fn aborts_map_to_exit_codes() {
        assert_eq!(report(&Abort::Interrupted), exit_codes::INTERRUPTED);
        assert_eq!(
            report(&Abort::InvalidConfig {
                detail: "bad".to_string()
            }),
            exit_codes::INVALID
        );
        assert_eq!(report(&Abort::MissingPatch), exit_codes::ABORTED);
    }
}
