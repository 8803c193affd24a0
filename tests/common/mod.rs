// SPDX-License-Identifier: GPL-3.0-only

//! Helpers shared by the integration tests

#![allow(dead_code)]

use frame_fanout::gpu::software::{SoftwareDriver, SoftwareWindow};
use frame_fanout::{
    Color, EngineConfig, EngineError, InputSurface, RenderHolderCallback, RendererHolder,
    VideoFrame,
};
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];
pub const CLEARED: [u8; 4] = [0, 0, 0, 0];

/// Poll `condition` until it holds or two seconds passed
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

/// Left half red, right half blue
pub fn split_frame(width: u32, height: u32) -> VideoFrame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..height {
        for x in 0..width {
            data.extend_from_slice(if x < width / 2 { &RED } else { &BLUE });
        }
    }
    VideoFrame::new(width, height, data).unwrap()
}

/// Counts every observer hook
#[derive(Default)]
pub struct Recorder {
    pub created: AtomicUsize,
    pub frames: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub errors: Mutex<Vec<EngineError>>,
}

impl Recorder {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> Vec<EngineError> {
        self.errors.lock().unwrap().clone()
    }
}

impl RenderHolderCallback for Recorder {
    fn on_master_surface_created(&self, _input: &InputSurface) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn on_frame_available(&self) {
        self.frames.fetch_add(1, Ordering::SeqCst);
    }

    fn on_destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, error: &EngineError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

#[derive(Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Parks the render worker in `on_frame_available` and `on_error` until opened
#[derive(Default)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
    pub destroyed: AtomicUsize,
}

impl Gate {
    /// Wait until the worker is parked at least once
    pub fn wait_entered(&self) -> bool {
        let state = self.state.lock().unwrap();
        let (state, timeout) = self
            .changed
            .wait_timeout_while(state, Duration::from_secs(2), |state| state.entered == 0)
            .unwrap();
        !timeout.timed_out() || state.entered > 0
    }

    pub fn open(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }
}

impl Gate {
    fn park(&self) {
        let mut state = self.state.lock().unwrap();
        state.entered += 1;
        self.changed.notify_all();
        let _state = self
            .changed
            .wait_while(state, |state| !state.open)
            .unwrap();
    }
}

impl RenderHolderCallback for Gate {
    fn on_frame_available(&self) {
        self.park();
    }

    fn on_error(&self, _error: &EngineError) {
        self.park();
    }

    fn on_destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// One-slot queue, destination 1 registered, worker parked in the gate and
/// the queue already full
pub fn parked_holder(gate: &Arc<Gate>) -> RendererHolder {
    let config = EngineConfig {
        width: 16,
        height: 16,
        command_queue_capacity: 1,
        ..EngineConfig::default()
    };
    let holder = RendererHolder::builder(SoftwareDriver::new())
        .config(config)
        .callback(gate.clone())
        .build()
        .unwrap();
    holder
        .add_destination(1, SoftwareWindow::new(16, 16), None)
        .unwrap();
    holder
        .input_surface()
        .unwrap()
        .push_frame(VideoFrame::solid(16, 16, RED))
        .unwrap();
    assert!(gate.wait_entered());
    holder.clear(1, Color::BLACK).unwrap();
    holder
}
