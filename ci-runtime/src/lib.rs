//! Automated CI repair loop.
//!
//! Runs a CI command, and while it fails (or passes with coverage below the
//! configured threshold) asks an LLM CLI for a unified diff, validates and
//! applies it, then reruns the command. Once the command passes the working
//! tree can be staged, described by an LLM-written commit message and pushed.
//!
//! - **[`core`]**: Pure, deterministic logic (attempt budget, diff
//!   extraction and safety checks, coverage parsing, log heuristics).
//! - **[`io`]**: Side effects (process execution, git, patch application,
//!   LLM CLI, prompts, config, interaction log, operator approval).
//!
//! Orchestration modules ([`repair`], [`patch_cycle`], [`diagnose`],
//! [`finalize`]) combine the two; [`session::RepairSession`] carries the
//! collaborators they share.

pub mod core;
pub mod diagnose;
pub mod error;
pub mod exit_codes;
pub mod finalize;
pub mod io;
pub mod logging;
pub mod options;
pub mod patch_cycle;
pub mod repair;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
