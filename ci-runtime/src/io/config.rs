//! Repository configuration shared with other CI tooling.
//!
//! Read from the first of [`CONFIG_CANDIDATES`] present in the repository
//! root. Other tools keep their own keys in the same file, so unknown keys are
//! ignored.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::git::DiffLimits;

pub const CONFIG_CANDIDATES: [&str; 3] = [
    "ci_shared.config.json",
    ".ci_shared.config.json",
    "ci_shared.config.toml",
];

pub const DEFAULT_REPO_CONTEXT: &str = "\
You are assisting with continuous integration fixes for this repository.
Keep patches minimal and focused rather than sweeping rewrites, and never
commit secrets. When CI fails, respond with a unified diff (a/ b/ prefixes)
that can be applied with `patch -p1`.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CiConfig {
    /// Path prefixes a patch may never touch.
    pub protected_path_prefixes: Vec<String>,

    /// Modules below this coverage percentage count as a failure.
    pub coverage_threshold: f64,

    /// Preamble placed at the top of every patch prompt.
    pub repo_context: String,

    /// Upper bound on a single LLM CLI invocation.
    pub llm_timeout_secs: u64,

    pub diff_max_chars: usize,
    pub diff_max_lines: usize,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            protected_path_prefixes: ["ci.py", "ci_tools/", "scripts/ci.sh", "Makefile"]
                .map(str::to_string)
                .to_vec(),
            coverage_threshold: 80.0,
            repo_context: DEFAULT_REPO_CONTEXT.to_string(),
            llm_timeout_secs: 30 * 60,
            diff_max_chars: 50_000,
            diff_max_lines: 1_000,
        }
    }
}

impl CiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.coverage_threshold.is_nan() || self.coverage_threshold <= 0.0 {
            return Err(anyhow!("coverage_threshold must be > 0"));
        }
        if self.llm_timeout_secs == 0 {
            return Err(anyhow!("llm_timeout_secs must be > 0"));
        }
        if self.diff_max_chars == 0 || self.diff_max_lines == 0 {
            return Err(anyhow!("diff_max_chars and diff_max_lines must be > 0"));
        }
        if self
            .protected_path_prefixes
            .iter()
            .any(|prefix| prefix.trim().is_empty())
        {
            return Err(anyhow!("protected_path_prefixes must not contain blank entries"));
        }
        Ok(())
    }

    pub fn diff_limits(&self) -> DiffLimits {
        DiffLimits {
            max_chars: self.diff_max_chars,
            max_lines: self.diff_max_lines,
        }
    }
}

/// First existing config candidate under `repo_root`.
pub fn find_config(repo_root: &Path) -> Option<PathBuf> {
    CONFIG_CANDIDATES
        .iter()
        .map(|name| repo_root.join(name))
        .find(|path| path.is_file())
}

/// Load and validate the repository config.
///
/// If no candidate exists, returns `CiConfig::default()`.
pub fn load_config(repo_root: &Path) -> Result<CiConfig> {
    let Some(path) = find_config(repo_root) else {
        debug!("no repository config found, using defaults");
        let cfg = CiConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    };
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CiConfig = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    };
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    debug!(path = %path.display(), "loaded repository config");
    Ok(cfg)
}
