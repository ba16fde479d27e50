//! Append-only audit trail of LLM prompts and responses (`logs/codex_ci.log`).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const LOG_FILE_NAME: &str = "codex_ci.log";

#[derive(Debug, Clone)]
pub struct InteractionLog {
    path: PathBuf,
}

impl InteractionLog {
    /// Log into `dir/codex_ci.log`; the directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(LOG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, kind: &str, prompt: &str, response: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let entry = format!(
            "--- {kind} ---\nPrompt:\n{}\nResponse:\n{}\n\n",
            prompt.trim(),
            response.trim()
        );
        file.write_all(entry.as_bytes())
            .with_context(|| format!("append {}", self.path.display()))
    }
}
