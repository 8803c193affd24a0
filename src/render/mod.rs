// SPDX-License-Identifier: GPL-3.0-only

//! Render worker and the state it shares with caller threads
//!
//! Callers never touch the graphics context. They enqueue [`Command`]s and,
//! where needed, block on the [`SurfaceRegistry`] until the worker reports
//! that their command was applied.

pub mod command;
pub mod input;
pub mod policy;
pub mod registry;
pub(crate) mod worker;

pub use command::{Command, CommandQueue, OfferError};
pub use input::{InputSurface, VideoFrame};
pub use policy::{LogAndContinue, LoopAction, StopAfter, WorkerErrorPolicy};
pub use registry::{DestinationAttributes, SurfaceRegistry, Throttle};

use crate::errors::{EngineError, EngineResult};
use crate::gpu::MirrorMode;
use crate::pipelines::still::request::CaptureSlot;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// Caller-supplied destination identifier
pub type DestinationId = i32;

/// Engine lifecycle; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RunState {
    NotStarted = 0,
    Running = 1,
    Released = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::NotStarted,
            1 => RunState::Running,
            _ => RunState::Released,
        }
    }
}

/// Render worker state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Starting = 0,
    Ready = 1,
    Idle = 2,
    Processing = 3,
    Stopping = 4,
    Stopped = 5,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Ready,
            2 => WorkerState::Idle,
            3 => WorkerState::Processing,
            4 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Everything the facade and the worker both reach
pub(crate) struct EngineShared {
    pub queue: CommandQueue,
    pub registry: SurfaceRegistry,
    pub capture: CaptureSlot,
    run_state: AtomicU8,
    worker_state: AtomicU8,
    /// Set by the producer's first frame, cleared when the master is recreated
    pub first_frame: AtomicBool,
    /// A draw request found the queue full
    pub draw_missed: AtomicBool,
    pub input: Mutex<Option<InputSurface>>,
    /// Last mirror mode requested by a caller
    pub mirror: Mutex<MirrorMode>,
    /// Last size requested by a caller
    pub size: Mutex<(u32, u32)>,
}

impl EngineShared {
    pub fn new(queue_capacity: usize, width: u32, height: u32) -> Self {
        Self {
            queue: CommandQueue::new(queue_capacity),
            registry: SurfaceRegistry::new(),
            capture: CaptureSlot::new(),
            run_state: AtomicU8::new(RunState::NotStarted as u8),
            worker_state: AtomicU8::new(WorkerState::Starting as u8),
            first_frame: AtomicBool::new(false),
            draw_missed: AtomicBool::new(false),
            input: Mutex::new(None),
            mirror: Mutex::new(MirrorMode::Normal),
            size: Mutex::new((width, height)),
        }
    }

    pub fn run_state(&self) -> RunState {
        RunState::from_u8(self.run_state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// NotStarted -> Running; never resurrects a released engine
    pub fn mark_running(&self) -> bool {
        self.run_state
            .compare_exchange(
                RunState::NotStarted as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Returns the previous state
    pub fn mark_released(&self) -> RunState {
        RunState::from_u8(
            self.run_state
                .swap(RunState::Released as u8, Ordering::AcqRel),
        )
    }

    pub fn check_running(&self) -> EngineResult<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(EngineError::AlreadyReleased)
        }
    }

    pub fn worker_state(&self) -> WorkerState {
        WorkerState::from_u8(self.worker_state.load(Ordering::Acquire))
    }

    pub fn set_worker_state(&self, state: WorkerState) {
        let previous = self.worker_state.swap(state as u8, Ordering::AcqRel);
        if previous != state as u8 {
            trace!(from = ?WorkerState::from_u8(previous), to = ?state, "Worker state");
        }
    }

    /// Replace any queued draw with a fresh one
    pub fn request_frame(&self) -> EngineResult<()> {
        self.check_running()?;
        match self.queue.offer_replacing(Command::Draw, Command::is_draw) {
            Ok(_) => Ok(()),
            Err(OfferError::Closed(_)) => Err(EngineError::AlreadyReleased),
            // The worker re-queues it once the queue drains
            Err(OfferError::Full(_)) => {
                trace!("Command queue full, draw request deferred");
                self.draw_missed.store(true, Ordering::Release);
                Ok(())
            }
        }
    }

    pub fn current_input(&self) -> Option<InputSurface> {
        self.input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_input(&self, input: Option<InputSurface>) {
        *self.input.lock().unwrap_or_else(PoisonError::into_inner) = input;
    }

    /// Wake every blocked caller; used on shutdown
    pub fn close_waiters(&self) {
        self.registry.close();
        if let Some(request) = self.capture.close() {
            trace!(ticket = request.ticket, "Dropped pending still capture");
        }
    }
}
