// SPDX-License-Identifier: GPL-3.0-only

//! Lifecycle observer
//!
//! Hooks run on the render worker thread. A panic inside a hook is caught
//! and logged; it never changes engine state.

use crate::errors::EngineError;
use crate::render::InputSurface;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Optional observer of engine lifecycle events; every hook defaults to a no-op
pub trait RenderHolderCallback: Send + Sync {
    /// A new input surface exists; hand it to the frame producer
    fn on_master_surface_created(&self, _input: &InputSurface) {}

    /// A draw pass finished
    fn on_frame_available(&self) {}

    /// Everything was released; called exactly once
    fn on_destroy(&self) {}

    /// A recoverable error happened on the worker
    fn on_error(&self, _error: &EngineError) {}
}

/// Panic-isolating wrapper around the user's callback
#[derive(Clone, Default)]
pub(crate) struct Observer {
    callback: Option<Arc<dyn RenderHolderCallback>>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Observer {
    pub fn new(callback: Option<Arc<dyn RenderHolderCallback>>) -> Self {
        Self { callback }
    }

    fn call(&self, hook: &'static str, f: impl FnOnce(&dyn RenderHolderCallback)) {
        let Some(callback) = self.callback.as_deref() else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(callback))) {
            warn!(hook, panic = %panic_message(payload.as_ref()), "Callback panicked");
        }
    }

    pub fn master_surface_created(&self, input: &InputSurface) {
        self.call("on_master_surface_created", |cb| {
            cb.on_master_surface_created(input)
        });
    }

    pub fn frame_available(&self) {
        self.call("on_frame_available", |cb| cb.on_frame_available());
    }

    pub fn destroy(&self) {
        self.call("on_destroy", |cb| cb.on_destroy());
    }

    pub fn error(&self, error: &EngineError) {
        self.call("on_error", |cb| cb.on_error(error));
    }
}

pub(crate) fn describe_panic(payload: &(dyn Any + Send)) -> String {
    panic_message(payload)
}
