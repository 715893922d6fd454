//! The simplifier port
//!
//! The orchestrator only sees this trait, so the external process can be
//! swapped for an in-process implementation without touching the state machine.

use crate::errors::SimplifyError;
use async_trait::async_trait;
use std::path::Path;

/// Everything a finished simplifier run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimplifierOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SimplifierOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Diagnostic for a failed run: stderr, or stdout when stderr is empty
    pub fn diagnostic(&self) -> &str {
        if self.stderr.is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

#[async_trait]
pub trait Simplifier: Send + Sync {
    /// Readiness check, run before any input is staged
    async fn prepare(&self) -> Result<(), SimplifyError>;

    /// Simplify the file at `input` (absolute path)
    async fn run(&self, input: &Path) -> Result<SimplifierOutput, SimplifyError>;
}
