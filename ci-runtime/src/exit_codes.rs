//! Stable exit codes for the `ci-runtime` binary.

/// The command passed (and finalization succeeded).
pub const OK: i32 = 0;
/// The repair workflow aborted (budget exhausted, missing patch, user quit, git failure).
pub const ABORTED: i32 = 1;
/// Invalid configuration, command line, or model selection.
pub const INVALID: i32 = 2;
/// Diagnosis found a failure that needs a human (missing import symbol, attribute error).
pub const MANUAL_INTERVENTION: i32 = 3;
/// Interrupted by Ctrl-C (128 + SIGINT).
pub const INTERRUPTED: i32 = 130;
