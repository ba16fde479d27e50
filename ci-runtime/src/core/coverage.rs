//! Coverage table parsing for pytest-cov style reports.

use crate::core::types::{CoverageCheckResult, CoverageDeficit};

/// `Name Stmts Miss Cover` is the narrowest row we accept.
const MIN_ROW_TOKENS: usize = 4;

/// Find the coverage table in `output` and collect rows strictly below `threshold`.
///
/// Returns `None` when there is no table or nothing falls below the threshold.
pub fn extract_coverage_deficits(output: &str, threshold: f64) -> Option<CoverageCheckResult> {
    if output.is_empty() {
        return None;
    }
    let lines: Vec<&str> = output.lines().collect();
    let table = find_table(&lines)?;
    // Skip the header and the dashed separator under it.
    let rows = table.get(2..).unwrap_or_default();
    let deficits = parse_deficits(rows, threshold);
    if deficits.is_empty() {
        return None;
    }
    Some(CoverageCheckResult {
        table_text: table.join("\n").trim().to_string(),
        deficits,
        threshold,
    })
}

fn find_table<'a>(lines: &[&'a str]) -> Option<Vec<&'a str>> {
    let header = lines.iter().position(|line| {
        let stripped = line.trim();
        stripped.starts_with("Name") && stripped.contains("Cover")
    })?;
    let mut table = vec![lines[header]];
    for &line in &lines[header + 1..] {
        table.push(line);
        if line.trim().is_empty() {
            break;
        }
    }
    (table.len() > 1).then_some(table)
}

fn parse_deficits(rows: &[&str], threshold: f64) -> Vec<CoverageDeficit> {
    let mut deficits = Vec::new();
    for row in rows {
        let stripped = row.trim();
        if stripped.is_empty() || stripped.starts_with('-') {
            continue;
        }
        let tokens: Vec<&str> = row.split_whitespace().collect();
        if tokens.len() < MIN_ROW_TOKENS {
            continue;
        }
        let Some(percent) = tokens[tokens.len() - 1].strip_suffix('%') else {
            continue;
        };
        let Ok(coverage_percent) = percent.parse::<f64>() else {
            continue;
        };
        let path = tokens[..tokens.len() - 3].join(" ");
        if path.is_empty() || path.eq_ignore_ascii_case("TOTAL") {
            continue;
        }
        if coverage_percent < threshold {
            deficits.push(CoverageDeficit {
                path,
                coverage_percent,
            });
        }
    }
    deficits
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
============ tests coverage ============
Name                 Stmts   Miss  Cover
----------------------------------------
src/app.py              40     20    50%
src/exact.py            10      2    80%
src/good.py             10      0   100%
my dir/spaced.py        10      5    50%
TOTAL                   70     27    61%

3 passed in 0.12s
";

    #[test]
    fn collects_rows_strictly_below_threshold() {
        let report = extract_coverage_deficits(REPORT, 80.0).expect("deficits");
        let paths: Vec<&str> = report.deficits.iter().map(|d| d.path.as_str()).collect();
        assert_eq!(paths, vec!["src/app.py", "my dir/spaced.py"]);
        assert_eq!(report.deficits[0].coverage_percent, 50.0);
        assert_eq!(report.threshold, 80.0);
        assert!(report.table_text.starts_with("Name"));
        assert!(report.table_text.contains("TOTAL"));
        assert!(!report.table_text.contains("passed"));
    }

    #[test]
    fn total_row_is_never_a_deficit() {
        let output = "Name Stmts Miss Cover\n---- ----- ---- -----\ntotal 10 9 10%\n";
        assert_eq!(extract_coverage_deficits(output, 80.0), None);
    }

    #[test]
    fn row_at_threshold_is_not_a_deficit() {
        let output = "Name Stmts Miss Cover\n-----\nsrc/a.py 10 2 80%\n";
        assert_eq!(extract_coverage_deficits(output, 80.0), None);
        assert!(extract_coverage_deficits(output, 80.5).is_some());
    }

    #[test]
    fn output_without_table_has_no_report() {
        assert_eq!(extract_coverage_deficits("all good\n", 80.0), None);
        assert_eq!(extract_coverage_deficits("", 80.0), None);
        assert_eq!(extract_coverage_deficits("Name Cover", 80.0), None);
    }

    #[test]
    fn rows_without_percent_are_skipped() {
        let output = "Name Stmts Miss Cover\n-----\nsrc/a.py 10 2 n/a\nsrc/b.py 10 8 20%\n";
        let report = extract_coverage_deficits(output, 80.0).expect("deficits");
        assert_eq!(report.deficits.len(), 1);
        assert_eq!(report.deficits[0].path, "src/b.py");
    }
}
