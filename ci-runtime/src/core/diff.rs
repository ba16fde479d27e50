//! Unified diff extraction and safety checks.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

/// Response meaning "no code change recommended".
pub const NOOP_SENTINEL: &str = "NOOP";

const DIFF_PREAMBLES: [&str; 4] = ["diff", "---", "Index:", "From "];

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:diff)?\s*(.*?)```").expect("fenced block regex"));

static DIFF_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(diff --git|--- |\+\+\+ )").expect("diff header regex"));

/// Checked in this order; the first match is the one reported.
static RISKY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        (r"\bDROP\s+TABLE\b", true),
        (r"rm\s+-rf", false),
        (r#"subprocess\.run\([^)]*['"]rm['"]"#, false),
    ]
    .iter()
    .map(|(pattern, ignore_case)| {
        RegexBuilder::new(pattern)
            .case_insensitive(*ignore_case)
            .build()
            .expect("risky pattern regex")
    })
    .collect()
});

/// Pull a diff out of free-form LLM text.
///
/// Preference order: a fenced block that looks like a diff, the first fenced
/// block, then the raw response.
pub fn extract_diff(response_text: &str) -> Option<String> {
    if response_text.is_empty() || response_text.trim().eq_ignore_ascii_case(NOOP_SENTINEL) {
        return None;
    }
    let blocks: Vec<&str> = FENCED_BLOCK_RE
        .captures_iter(response_text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .collect();
    if let Some(first) = blocks.first() {
        let diff_block = blocks
            .iter()
            .find(|block| DIFF_PREAMBLES.iter().any(|p| block.starts_with(p)))
            .unwrap_or(first);
        return Some((*diff_block).to_string());
    }
    Some(response_text.to_string())
}

pub fn has_diff_header(text: &str) -> bool {
    DIFF_HEADER_RE.is_match(text)
}

/// Simple `+`/`-` prefix count; file markers are counted too.
pub fn count_changed_lines(diff_text: &str) -> usize {
    diff_text
        .lines()
        .filter(|line| line.starts_with('+') || line.starts_with('-'))
        .count()
}

pub fn exceeds_line_budget(diff_text: &str, limit: usize) -> (bool, Option<String>) {
    let changed = count_changed_lines(diff_text);
    if changed > limit {
        return (
            true,
            Some(format!(
                "Patch has {changed} changed lines which exceeds the limit of {limit}."
            )),
        );
    }
    (false, None)
}

/// Source text of the first risky pattern found in the diff.
pub fn risky_pattern(diff_text: &str) -> Option<&'static str> {
    RISKY_PATTERNS
        .iter()
        .find(|re| re.is_match(diff_text))
        .map(|re| re.as_str())
}

/// Paths named by `diff --git`, `---` or `+++` headers that fall under a
/// protected prefix. `/dev/null` sides are ignored.
pub fn protected_paths_touched<S: AsRef<str>>(
    diff_text: &str,
    protected_prefixes: &[S],
) -> BTreeSet<String> {
    let mut touched = BTreeSet::new();
    for line in diff_text.lines() {
        for candidate in header_paths(line) {
            if candidate == "/dev/null" {
                continue;
            }
            let path = strip_side_prefix(candidate);
            if protected_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_ref()))
            {
                touched.insert(path.to_string());
            }
        }
    }
    touched
}

fn header_paths(line: &str) -> Vec<&str> {
    if line.starts_with("diff --git") {
        let parts: Vec<&str> = line.split_whitespace().collect();
        return if parts.len() < 4 {
            Vec::new()
        } else {
            vec![parts[2], parts[3]]
        };
    }
    // A trailing tab may carry a timestamp.
    line.strip_prefix("--- ")
        .or_else(|| line.strip_prefix("+++ "))
        .and_then(|rest| rest.split('\t').next())
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .into_iter()
        .collect()
}

fn strip_side_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Combined safety gate: line budget, protected paths, risky patterns.
///
/// Returns the rejection reason, or `None` when the patch looks safe.
pub fn patch_looks_risky<S: AsRef<str>>(
    diff_text: &str,
    max_lines: usize,
    protected_prefixes: &[S],
) -> (bool, Option<String>) {
    if diff_text.is_empty() {
        return (true, Some("Patch content was empty.".to_string()));
    }

    let (too_large, reason) = exceeds_line_budget(diff_text, max_lines);
    if too_large {
        return (true, reason);
    }

    let protected = protected_paths_touched(diff_text, protected_prefixes);
    if !protected.is_empty() {
        let offending = protected.into_iter().collect::<Vec<_>>().join(", ");
        return (
            true,
            Some(format!(
                "Patch attempted to modify protected path `{offending}`."
            )),
        );
    }

    if let Some(pattern) = risky_pattern(diff_text) {
        return (true, Some(format!("Patch matched risky pattern: {pattern}")));
    }

    (false, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_DIFF: &str = "diff --git a/src/app.py b/src/app.py\n--- a/src/app.py\n+++ b/src/app.py\n@@ -1 +1 @@\n-x = 1\n+x = 2\n";

    #[test]
    fn noop_response_yields_nothing() {
        assert_eq!(extract_diff("NOOP"), None);
        assert_eq!(extract_diff("  noop \n"), None);
        assert_eq!(extract_diff(""), None);
    }

    #[test]
    fn prefers_diff_looking_fenced_block() {
        let response = format!(
            "Explanation:\n```python\nprint('hi')\n```\nPatch:\n```diff\n{SIMPLE_DIFF}```\n"
        );
        let diff = extract_diff(&response).expect("diff");
        assert!(diff.starts_with("diff --git a/src/app.py"));
    }

    #[test]
    fn falls_back_to_first_fenced_block() {
        let response = "```\nsomething else\n```\n```\nmore\n```";
        assert_eq!(extract_diff(response).as_deref(), Some("something else"));
    }

    #[test]
    fn unfenced_response_is_returned_verbatim() {
        assert_eq!(extract_diff(SIMPLE_DIFF).as_deref(), Some(SIMPLE_DIFF));
    }

    #[test]
    fn header_detection_is_multiline() {
        assert!(has_diff_header(SIMPLE_DIFF));
        assert!(has_diff_header("note\n+++ b/file\n"));
        assert!(!has_diff_header("just prose\n@@ -1 +1 @@\n"));
    }

    #[test]
    fn counts_plus_and_minus_prefixed_lines() {
        // Two file markers plus one removal and one addition.
        assert_eq!(count_changed_lines(SIMPLE_DIFF), 4);
    }

    #[test]
    fn line_budget_message_names_actual_and_limit() {
        let body: String = (0..2000).map(|i| format!("+line {i}\n")).collect();
        let (exceeded, message) = exceeds_line_budget(&body, 1500);
        assert!(exceeded);
        let message = message.expect("message");
        assert!(message.contains("2000"));
        assert!(message.contains("1500"));

        let (exceeded, message) = exceeds_line_budget(&body, 2000);
        assert!(!exceeded);
        assert_eq!(message, None);
    }

    #[test]
    fn risky_detection_reports_first_pattern_in_fixed_order() {
        let both = "+rm -rf /tmp/x\n+DROP TABLE users;\n";
        assert_eq!(risky_pattern(both), Some(r"\bDROP\s+TABLE\b"));
        assert_eq!(risky_pattern("+rm -rf build\n"), Some(r"rm\s+-rf"));
        assert_eq!(
            risky_pattern("+subprocess.run(['rm', path])\n"),
            Some(r#"subprocess\.run\([^)]*['"]rm['"]"#)
        );
        assert!(risky_pattern("+drop table users\n").is_some());
        assert_eq!(risky_pattern(SIMPLE_DIFF), None);
    }

    #[test]
    fn protected_paths_are_collected_from_both_sides() {
        let diff = "diff --git a/ci_tools/run.py b/ci_tools/run.py\n--- a/ci_tools/run.py\n+++ b/ci_tools/run.py\ndiff --git a/src/ok.py b/scripts/ci.sh\n";
        let touched = protected_paths_touched(diff, &["ci_tools/", "scripts/ci.sh"]);
        let touched: Vec<_> = touched.into_iter().collect();
        assert_eq!(touched, vec!["ci_tools/run.py", "scripts/ci.sh"]);
    }

    #[test]
    fn protected_paths_are_read_from_file_markers_without_git_header() {
        let diff = "--- a/Makefile\n+++ b/Makefile\n@@ -1,2 +1,2 @@\n all:\n-\techo ok\n+\techo changed\n";
        let touched: Vec<_> = protected_paths_touched(diff, &["Makefile"]).into_iter().collect();
        assert_eq!(touched, vec!["Makefile"]);

        let (risky, reason) = patch_looks_risky(diff, 1500, &["Makefile", "ci_tools/"]);
        assert!(risky);
        assert_eq!(
            reason.as_deref(),
            Some("Patch attempted to modify protected path `Makefile`.")
        );
    }

    #[test]
    fn dev_null_and_timestamps_are_ignored_in_file_markers() {
        let created = "--- /dev/null\n+++ b/ci_tools/new.py\t2024-01-01 00:00:00\n@@ -0,0 +1 @@\n+x = 1\n";
        let touched: Vec<_> = protected_paths_touched(created, &["ci_tools/", "/dev"])
            .into_iter()
            .collect();
        assert_eq!(touched, vec!["ci_tools/new.py"]);
    }

    #[test]
    fn risky_gate_checks_budget_then_paths_then_patterns() {
        let (risky, reason) = patch_looks_risky(SIMPLE_DIFF, 1, &["Makefile"]);
        assert!(risky);
        assert!(reason.expect("reason").contains("exceeds the limit of 1"));

        let makefile = "diff --git a/Makefile b/Makefile\n+rm -rf /\n";
        let (risky, reason) = patch_looks_risky(makefile, 100, &["Makefile"]);
        assert!(risky);
        assert_eq!(
            reason.as_deref(),
            Some("Patch attempted to modify protected path `Makefile`.")
        );

        let (risky, reason) = patch_looks_risky("diff --git a/x b/x\n+rm -rf /\n", 100, &["Makefile"]);
        assert!(risky);
        assert!(reason.expect("reason").starts_with("Patch matched risky pattern"));

        assert_eq!(patch_looks_risky(SIMPLE_DIFF, 100, &["Makefile"]), (false, None));
        assert!(patch_looks_risky("", 100, &["Makefile"]).0);
    }
}
