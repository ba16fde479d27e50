//! Side-effecting adapters: processes, git, patch tools, the LLM CLI and the terminal.

pub mod approval;
pub mod config;
pub mod git;
pub mod interaction_log;
pub mod interrupt;
pub mod llm;
pub mod patch;
pub mod process;
pub mod prompt;
