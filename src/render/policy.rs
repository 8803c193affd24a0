// SPDX-License-Identifier: GPL-3.0-only

//! What the render worker does after a command fails

use crate::errors::EngineError;
use tracing::{error, warn};

/// Action returned by the error policy to control the worker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep processing commands
    Continue,
    /// Leave the loop and shut the engine down
    Stop,
}

/// Decides whether an error escaping a command stops the worker
pub trait WorkerErrorPolicy: Send {
    fn on_error(&mut self, error: &EngineError) -> LoopAction;
}

/// Log and keep going
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAndContinue;

impl WorkerErrorPolicy for LogAndContinue {
    fn on_error(&mut self, error: &EngineError) -> LoopAction {
        warn!(error = %error, "Render command failed");
        LoopAction::Continue
    }
}

/// Stop once `limit` failures were seen
#[derive(Debug, Clone, Copy)]
pub struct StopAfter {
    limit: usize,
    seen: usize,
}

impl StopAfter {
    pub fn new(limit: usize) -> Self {
        Self { limit, seen: 0 }
    }
}

impl WorkerErrorPolicy for StopAfter {
    fn on_error(&mut self, err: &EngineError) -> LoopAction {
        self.seen += 1;
        if self.seen >= self.limit {
            error!(error = %err, failures = self.seen, "Too many render failures, stopping");
            LoopAction::Stop
        } else {
            warn!(error = %err, failures = self.seen, "Render command failed");
            LoopAction::Continue
        }
    }
}

impl<F> WorkerErrorPolicy for F
where
    F: FnMut(&EngineError) -> LoopAction + Send,
{
    fn on_error(&mut self, error: &EngineError) -> LoopAction {
        self(error)
    }
}
