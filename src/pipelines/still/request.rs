// SPDX-License-Identifier: GPL-3.0-only

//! Pending still capture slot
//!
//! At most one request exists at a time, counting from submission until the
//! worker has written the image. Blocking callers get their sink back along
//! with the result.

use super::encoding::StillFormat;
use crate::errors::{EngineError, EngineResult};
use std::any::Any;
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Byte sink a still is written to
pub trait CaptureSink: Write + Send {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<W: Write + Send + 'static> CaptureSink for W {
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

pub(crate) struct CaptureRequest {
    pub ticket: u64,
    pub sink: Box<dyn CaptureSink>,
    pub format: StillFormat,
    pub quality: u8,
    /// A caller is blocked on this ticket
    pub blocking: bool,
}

/// What a blocking caller receives
pub(crate) struct Completed {
    pub result: EngineResult<()>,
    pub sink: Box<dyn CaptureSink>,
}

struct SlotState {
    pending: Option<CaptureRequest>,
    active: Option<u64>,
    next_ticket: u64,
    finished: HashMap<u64, Completed>,
    closed: bool,
}

pub(crate) struct CaptureSlot {
    state: Mutex<SlotState>,
    done: Condvar,
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: None,
                active: None,
                next_ticket: 1,
                finished: HashMap::new(),
                closed: false,
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a request; fails if one is still outstanding
    pub fn submit(
        &self,
        sink: Box<dyn CaptureSink>,
        format: StillFormat,
        quality: u8,
        blocking: bool,
    ) -> EngineResult<u64> {
        let mut state = self.lock();
        if state.closed {
            return Err(EngineError::AlreadyReleased);
        }
        if state.pending.is_some() || state.active.is_some() {
            return Err(EngineError::CaptureInProgress);
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.pending = Some(CaptureRequest {
            ticket,
            sink,
            format,
            quality,
            blocking,
        });
        Ok(ticket)
    }

    pub fn is_pending(&self) -> bool {
        let state = self.lock();
        state.pending.is_some() || state.active.is_some()
    }

    /// Worker side: claim the pending request
    pub fn begin(&self) -> Option<CaptureRequest> {
        let mut state = self.lock();
        let request = state.pending.take()?;
        state.active = Some(request.ticket);
        Some(request)
    }

    /// Worker side: clear the request and wake its waiter
    pub fn finish(&self, ticket: u64, blocking: bool, completed: Completed) {
        let mut state = self.lock();
        if state.active == Some(ticket) {
            state.active = None;
        }
        if blocking && !state.closed {
            state.finished.insert(ticket, completed);
        }
        self.done.notify_all();
    }

    /// Block until `ticket` finished, re-checking liveness every `poll`
    pub fn wait(&self, ticket: u64, poll: Duration) -> EngineResult<Completed> {
        let mut state = self.lock();
        loop {
            if let Some(completed) = state.finished.remove(&ticket) {
                return Ok(completed);
            }
            if state.closed {
                return Err(EngineError::AlreadyReleased);
            }
            state = self
                .done
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Drop any request and wake waiters
    pub fn close(&self) -> Option<CaptureRequest> {
        let mut state = self.lock();
        state.closed = true;
        state.finished.clear();
        let pending = state.pending.take();
        self.done.notify_all();
        pending
    }
}
