//! Deterministic, pure logic shared by the repair loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and values and return deterministic outputs suitable for tests.

pub mod attempts;
pub mod coverage;
pub mod diff;
pub mod heuristics;
pub mod types;
