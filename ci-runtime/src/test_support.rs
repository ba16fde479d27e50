//! Test-only helpers: throwaway git repositories and scripted adapters.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::error::CliInvocationError;
use crate::io::approval::{Approval, Approver};
use crate::io::llm::LlmClient;
use crate::options::{ReasoningEffort, RunArgs, RunContext};

/// A temporary git repository with `src/app.py` (`x = 1`) committed.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let repo = Self { dir };
        repo.git(&["init", "-q"]);
        repo.git(&["config", "user.email", "ci@example.com"]);
        repo.git(&["config", "user.name", "CI Runtime Tests"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo.write("src/app.py", "x = 1\n");
        repo.git(&["add", "-A"]);
        repo.git(&["commit", "-q", "-m", "initial"]);
        repo
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, contents).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path().join(rel)).expect("read file")
    }

    /// Run git in the repository and return stdout. Panics on failure.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .expect("spawn git");
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Run context rooted at this repository with a fixed model and no env file.
    pub fn context(&self, customize: impl FnOnce(&mut RunArgs)) -> RunContext {
        let mut args = RunArgs {
            command: "true".to_string(),
            model: Some("gpt-5-codex".to_string()),
            reasoning_effort: Some(ReasoningEffort::Medium),
            env_file: self.path().join("missing.env").display().to_string(),
            ..RunArgs::default()
        };
        customize(&mut args);
        RunContext::for_root(self.path().to_path_buf(), args).expect("run context")
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a diff in a fenced `diff` block the way models usually answer.
pub fn fenced(diff: &str) -> String {
    format!("```diff\n{diff}```")
}

/// LLM client that replays queued responses and records every prompt.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: RefCell<VecDeque<Result<String, CliInvocationError>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::from_results(responses.into_iter().map(|r| Ok(r.into())).collect())
    }

    /// Queue explicit outcomes, including CLI failures.
    pub fn from_results(results: Vec<Result<String, CliInvocationError>>) -> Self {
        Self {
            responses: RefCell::new(results.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.borrow()[index].clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn invoke(&self, prompt: &str, _description: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(err)) => Err(err.into()),
            None => Err(anyhow!("no scripted response left")),
        }
    }
}

/// Approver that replays decisions, approving once the script runs out.
#[derive(Default)]
pub struct ScriptedApprover {
    decisions: RefCell<VecDeque<Approval>>,
    asked: Cell<usize>,
}

impl ScriptedApprover {
    pub fn new(decisions: impl IntoIterator<Item = Approval>) -> Self {
        Self {
            decisions: RefCell::new(decisions.into_iter().collect()),
            asked: Cell::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.get()
    }
}

impl Approver for ScriptedApprover {
    fn approve(&self, _attempt: u32) -> Result<Approval> {
        self.asked.set(self.asked.get() + 1);
        Ok(self
            .decisions
            .borrow_mut()
            .pop_front()
            .unwrap_or(Approval::Approved))
    }
}
