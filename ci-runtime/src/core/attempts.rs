//! Patch attempt budget for one failing iteration.
//!
//! Two pools are tracked: a fixed attempt ceiling and a small pool of extra
//! retries that may only be spent on retryable failures. A run of fatal
//! failures therefore stops at the ceiling, while transient apply failures get
//! a bounded number of extra chances.

use crate::error::Abort;

/// Extra attempts grantable beyond the ceiling.
pub const DEFAULT_EXTRA_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchAttemptState {
    max_attempts: u32,
    current_attempt: u32,
    extra_retry_budget: u32,
    last_error: Option<String>,
}

impl PatchAttemptState {
    pub fn new(max_attempts: u32) -> Self {
        Self::with_extra_budget(max_attempts, DEFAULT_EXTRA_RETRY_BUDGET)
    }

    pub fn with_extra_budget(max_attempts: u32, extra_retry_budget: u32) -> Self {
        Self {
            max_attempts,
            current_attempt: 1,
            extra_retry_budget,
            last_error: None,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn extra_retry_budget(&self) -> u32 {
        self.extra_retry_budget
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_last_error(&mut self) {
        self.last_error = None;
    }

    /// Must pass before every patch request.
    pub fn ensure_within_budget(&self) -> Result<(), Abort> {
        if self.current_attempt > self.max_attempts {
            return Err(Abort::AttemptsExhausted);
        }
        Ok(())
    }

    /// Record a failed attempt, growing the ceiling by one when a retryable
    /// failure lands on it and extra budget remains.
    pub fn record_failure(&mut self, message: impl Into<String>, retryable: bool) -> Result<(), Abort> {
        self.last_error = Some(message.into());
        if self.current_attempt >= self.max_attempts {
            if !retryable || self.extra_retry_budget == 0 {
                return Err(Abort::RetriesExhausted);
            }
            self.extra_retry_budget -= 1;
            self.max_attempts += 1;
        }
        self.current_attempt += 1;
        Ok(())
    }
}
