//! Turning a failed (or under-covered) command run into a [`FailureContext`].

use std::path::Path;

use tracing::{debug, instrument};

use crate::core::heuristics::{
    detect_attribute_error, detect_missing_symbol_error, summarize_failure, tail_text,
};
use crate::core::types::{CommandResult, CoverageCheckResult, FailureContext};
use crate::error::Abort;
use crate::io::git::Git;

/// Build the context the LLM needs for a follow-up patch.
///
/// A coverage report takes priority over log analysis. Import and attribute
/// errors abort with [`Abort::ManualIntervention`] instead of asking for a patch.
#[instrument(skip_all, fields(exit_code = result.exit_code, coverage = coverage_report.is_some()))]
pub fn build_failure_context(
    git: &Git,
    repo_root: &Path,
    log_tail: usize,
    result: &CommandResult,
    coverage_report: Option<CoverageCheckResult>,
) -> Result<FailureContext, Abort> {
    let (log_excerpt, summary, implicated_files) = match &coverage_report {
        Some(report) => {
            let (summary, log_excerpt, implicated) = render_coverage_context(report);
            let listing: Vec<String> = report
                .deficits
                .iter()
                .map(|deficit| format!("{} ({:.1}%)", deficit.path, deficit.coverage_percent))
                .collect();
            println!(
                "[coverage] Coverage below {:.0}% detected for: {}",
                report.threshold,
                listing.join(", ")
            );
            println!("[loop] Consulting the LLM for additional tests to lift coverage.");
            (log_excerpt, summary, implicated)
        }
        None => {
            let log_excerpt = tail_text(&result.combined_output(), log_tail);
            guard_manual_intervention(&log_excerpt, repo_root)?;
            let (summary, implicated) = summarize_failure(&log_excerpt, repo_root);
            println!(
                "[loop] CI failed with exit code {}. Consulting the LLM...",
                result.exit_code
            );
            (log_excerpt, summary, implicated)
        }
    };

    let focused_diff = gather_focused_diff(git, &implicated_files)?;
    debug!(
        implicated = implicated_files.len(),
        focused_diff_len = focused_diff.len(),
        "built failure context"
    );
    Ok(FailureContext {
        log_excerpt,
        summary,
        implicated_files,
        focused_diff,
        coverage_report,
    })
}

fn guard_manual_intervention(log_excerpt: &str, repo_root: &Path) -> Result<(), Abort> {
    if let Some(hint) = detect_missing_symbol_error(log_excerpt) {
        eprintln!("[guard] {hint}");
        eprintln!("[guard] Resolve the missing symbol or adjust the import before rerunning.");
        return Err(Abort::ManualIntervention { hint });
    }
    if let Some(hint) = detect_attribute_error(log_excerpt, repo_root) {
        eprintln!("[guard] {hint}");
        return Err(Abort::ManualIntervention { hint });
    }
    Ok(())
}

/// Summary, log excerpt and implicated files for a coverage deficit.
fn render_coverage_context(report: &CoverageCheckResult) -> (String, String, Vec<String>) {
    let deficits: Vec<String> = report
        .deficits
        .iter()
        .map(|deficit| format!("- {}: {:.1}%", deficit.path, deficit.coverage_percent))
        .collect();
    let intro = format!(
        "Coverage guard triggered: add or expand tests so each listed module meets the {:.0}% threshold.",
        report.threshold
    );
    let header = format!(
        "Coverage deficits detected (threshold {:.0}%):",
        report.threshold
    );

    let mut summary_lines = vec![intro.clone()];
    summary_lines.extend(deficits.iter().cloned());

    let mut excerpt_lines = vec![intro, String::new(), header];
    excerpt_lines.extend(deficits);
    excerpt_lines.push(String::new());
    excerpt_lines.push(report.table_text.clone());

    let implicated = report
        .deficits
        .iter()
        .map(|deficit| deficit.path.clone())
        .collect();
    (summary_lines.join("\n"), excerpt_lines.join("\n"), implicated)
}

fn gather_focused_diff(git: &Git, implicated_files: &[String]) -> Result<String, Abort> {
    let mut blocks = Vec::new();
    for path in implicated_files {
        let diff = git.file_diff(path)?;
        if !diff.is_empty() {
            blocks.push(diff);
        }
    }
    Ok(blocks.join("\n\n"))
}
