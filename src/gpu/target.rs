// SPDX-License-Identifier: GPL-3.0-only

//! Renderable target bound to the worker's context

use super::{DriverContext, NativeWindow, SurfaceKey};
use crate::constants::DEFAULT_TARGET_SIZE;
use crate::errors::GraphicsError;
use std::sync::Arc;
use tracing::trace;

/// One window or off-screen buffer that can be made current and presented
pub struct OutputTarget {
    surface: Option<SurfaceKey>,
    window: Option<Arc<dyn NativeWindow>>,
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("surface", &self.surface)
            .field("window", &self.window.as_ref().map(|w| w.kind()))
            .finish()
    }
}

impl OutputTarget {
    /// Bind a native window; the target is current on return
    pub fn bind_to_window(
        ctx: &mut dyn DriverContext,
        window: Arc<dyn NativeWindow>,
    ) -> Result<Self, GraphicsError> {
        if !window.kind().is_supported() {
            return Err(GraphicsError::BadNativeWindow(format!(
                "{:?} cannot back a surface",
                window.kind()
            )));
        }
        let surface = ctx.create_window_surface(&window)?;
        let target = Self {
            surface: Some(surface),
            window: Some(window),
        };
        target.make_current(ctx)?;
        Ok(target)
    }

    /// Off-screen buffer; zero dimensions become 1x1. Current on return.
    pub fn offscreen(
        ctx: &mut dyn DriverContext,
        width: u32,
        height: u32,
    ) -> Result<Self, GraphicsError> {
        let (width, height) = if width == 0 || height == 0 {
            (DEFAULT_TARGET_SIZE, DEFAULT_TARGET_SIZE)
        } else {
            (width, height)
        };
        let surface = ctx.create_offscreen_surface(width, height)?;
        let target = Self {
            surface: Some(surface),
            window: None,
        };
        target.make_current(ctx)?;
        Ok(target)
    }

    pub fn is_offscreen(&self) -> bool {
        self.window.is_none()
    }

    pub fn is_released(&self) -> bool {
        self.surface.is_none()
    }

    fn key(&self) -> Result<SurfaceKey, GraphicsError> {
        self.surface.ok_or(GraphicsError::TargetReleased)
    }

    /// Current pixel size, `None` once released or torn down
    pub fn size(&self, ctx: &dyn DriverContext) -> Option<(u32, u32)> {
        let (width, height) = ctx.surface_size(self.surface?)?;
        (width > 0 && height > 0).then_some((width, height))
    }

    pub fn is_valid(&self, ctx: &dyn DriverContext) -> bool {
        self.size(ctx).is_some()
    }

    /// Make current and set the viewport to the full surface
    pub fn make_current(&self, ctx: &mut dyn DriverContext) -> Result<(), GraphicsError> {
        let key = self.key()?;
        let (width, height) = self.size(ctx).ok_or(GraphicsError::InvalidTarget)?;
        ctx.make_current(key)?;
        ctx.set_viewport(0, 0, width, height);
        Ok(())
    }

    pub fn swap(&self, ctx: &mut dyn DriverContext) -> Result<(), GraphicsError> {
        ctx.swap(self.key()?)
    }

    /// Destroy the native surface; later calls do nothing
    pub fn release(&mut self, ctx: &mut dyn DriverContext) {
        if let Some(key) = self.surface.take() {
            ctx.destroy_surface(key);
            trace!(surface = key, "Output target released");
        }
        self.window = None;
    }
}
