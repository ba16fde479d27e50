//! Ctrl-C handling.
//!
//! The handler only raises a flag. The repair loop polls it after each
//! blocking step and unwinds with [`Abort::Interrupted`].

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::error::Abort;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Register the process-wide handler. Call once at startup.
pub fn install() -> Result<()> {
    ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
        .context("install Ctrl-C handler")
}

pub fn requested() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn check() -> Result<(), Abort> {
    if requested() {
        return Err(Abort::Interrupted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_until_interrupted() {
        assert!(check().is_ok());
    }
}
