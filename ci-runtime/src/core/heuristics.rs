//! Log analysis for failure diagnosis.
//!
//! Everything here works on text and paths lexically; resolving paths against
//! the filesystem is the caller's job.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static IMPORT_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ImportError: cannot import name '([^']+)' from '([^']+)'")
        .expect("import error regex")
});

static ATTRIBUTE_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"AttributeError:\s+'[^']+'\s+object\s+has\s+no\s+attribute\s+'([^']+)'")
        .expect("attribute error regex")
});

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "([^"]+)", line \d+, in[^\n]+"#).expect("frame regex")
});

/// Last `lines` lines of `text`.
pub fn tail_text(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Guidance when the log shows `cannot import name 'X' from 'Y'`.
pub fn detect_missing_symbol_error(log_excerpt: &str) -> Option<String> {
    let caps = IMPORT_ERROR_RE.captures(log_excerpt)?;
    Some(format!(
        "ImportError detected: missing symbol `{}` in module `{}`.\n\
         Investigate the import paths or ensure the symbol exists before rerunning.",
        &caps[1], &caps[2]
    ))
}

/// Guidance when an `AttributeError` can be pinned to a file inside the repository.
///
/// Stack frames are scanned innermost first; frames outside `repo_root` are skipped.
pub fn detect_attribute_error(log_excerpt: &str, repo_root: &Path) -> Option<String> {
    let caps = ATTRIBUTE_ERROR_RE.captures(log_excerpt)?;
    let attribute = &caps[1];
    let frames: Vec<&str> = FRAME_RE
        .captures_iter(log_excerpt)
        .filter_map(|frame| frame.get(1))
        .map(|m| m.as_str())
        .collect();
    let candidate = frames
        .iter()
        .rev()
        .find_map(|frame| repo_relative(Path::new(frame), repo_root))?;
    Some(format!(
        "AttributeError detected: missing attribute `{attribute}` in `{}`.\n\
         Review the failing attribute manually before retrying.",
        candidate.display()
    ))
}

/// Unique `file:line` locations under `repo_root`, in order of first appearance.
///
/// Type-checker summary lines (those naming `pyright` with a colon) are ignored.
pub fn summarize_failure(log_excerpt: &str, repo_root: &Path) -> (String, Vec<String>) {
    let root = normalize(repo_root);
    let Ok(location_re) = Regex::new(&format!(
        r"{}/([^\s:]+):(\d+)",
        regex::escape(root.to_string_lossy().trim_end_matches('/'))
    )) else {
        return (String::new(), Vec::new());
    };

    let mut locations: Vec<(String, String)> = Vec::new();
    for line in log_excerpt.lines() {
        if line.contains("pyright") && line.contains(':') {
            continue;
        }
        let Some(caps) = location_re.captures(line) else {
            continue;
        };
        let path = caps[1].to_string();
        if locations.iter().any(|(seen, _)| *seen == path) {
            continue;
        }
        locations.push((path, caps[2].to_string()));
    }

    if locations.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut summary = String::from("type checker reported errors:");
    for (path, line) in &locations {
        summary.push_str(&format!("\n- {path}:{line}"));
    }
    let files = locations.into_iter().map(|(path, _)| path).collect();
    (summary, files)
}

fn repo_relative(frame: &Path, repo_root: &Path) -> Option<PathBuf> {
    let frame = if frame.is_absolute() {
        normalize(frame)
    } else {
        normalize(&repo_root.join(frame))
    };
    let relative = frame.strip_prefix(normalize(repo_root)).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(relative.to_path_buf())
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
