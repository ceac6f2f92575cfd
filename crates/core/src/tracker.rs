// SPDX-License-Identifier: MIT

//! Per-flow error accumulation: many non-fatal errors, at most one fatal one.

use std::fmt;

/// Collects the errors a single task flow runs into. Only a non-empty
/// fatal slot flips the owning task to FAILED; everything else is kept
/// for `run_errors.json` but does not change the outcome.
#[derive(Debug, Default)]
pub struct ErrorTracker {
    non_fatal: Vec<String>,
    fatal: Option<String>,
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error that should not, by itself, fail the task.
    pub fn record(&mut self, message: impl Into<String>) {
        self.non_fatal.push(message.into());
    }

    /// Record the (first) fatal error. Subsequent calls are folded into
    /// the non-fatal bucket so no information is discarded, but only the
    /// first fatal error determines the outcome.
    pub fn record_fatal(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.fatal.is_none() {
            self.fatal = Some(message);
        } else {
            self.non_fatal.push(message);
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn fatal(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    pub fn non_fatal(&self) -> &[String] {
        &self.non_fatal
    }

    pub fn is_empty(&self) -> bool {
        self.fatal.is_none() && self.non_fatal.is_empty()
    }
}

impl fmt::Display for ErrorTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(fatal) = &self.fatal {
            write!(f, "fatal: {fatal}")?;
        }
        for err in &self.non_fatal {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}
