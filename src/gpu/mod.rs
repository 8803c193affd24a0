// SPDX-License-Identifier: GPL-3.0-only

//! Graphics layer used by the render worker.
//!
//! The worker never talks to a native API directly. It goes through two
//! traits:
//!
//! - [`GraphicsDriver`] is created on the caller thread and moved into the
//!   render worker, where it builds exactly one [`DriverContext`].
//! - [`DriverContext`] owns every native object (surfaces, textures) and is
//!   only ever touched from the render worker thread.
//!
//! [`wgpu_driver`] renders on the GPU. [`software`] ships a CPU
//! implementation used by the test-suite.

pub mod context;
pub mod matrix;
pub mod software;
pub mod target;
pub mod wgpu_driver;

pub use context::{ColorFormat, ConfigAttempt, GraphicsContext};
pub use matrix::{Mat4, MirrorMode};
pub use target::OutputTarget;

use crate::errors::GraphicsError;
use std::any::Any;
use std::sync::Arc;

/// Key of a surface inside a [`DriverContext`]
pub type SurfaceKey = u64;

/// Key of a texture inside a [`DriverContext`]
pub type TextureKey = u64;

/// Opaque native context handle, immutable once the context exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Kind of object offered as a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// On-screen window
    Window,
    /// Window backed by another consumer such as a video encoder
    Consumer,
    /// Texture-backed image stream
    Texture,
    /// Anything else; never accepted as a destination
    Other,
}

impl WindowKind {
    pub fn is_supported(&self) -> bool {
        !matches!(self, WindowKind::Other)
    }
}

/// Native window-like object a destination is bound to
pub trait NativeWindow: Send + Sync + 'static {
    fn kind(&self) -> WindowKind;

    /// Driver-side downcasting
    fn as_any(&self) -> &dyn Any;
}

/// ARGB colour as used by clear commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(pub u32);

impl Color {
    pub const BLACK: Color = Color(0xff00_0000);
    pub const TRANSPARENT: Color = Color(0);

    pub fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Color(u32::from_be_bytes([a, r, g, b]))
    }

    /// Normalized `[r, g, b, a]`
    pub fn to_rgba_f32(self) -> [f32; 4] {
        let [a, r, g, b] = self.0.to_be_bytes();
        [
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        ]
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        let [a, r, g, b] = self.0.to_be_bytes();
        [r, g, b, a]
    }
}

/// Factory for the single native context of an engine
pub trait GraphicsDriver: Send + 'static {
    /// Human-readable driver name for logs
    fn name(&self) -> &str;

    /// Try one configuration. Rejection is reported as
    /// [`GraphicsError::ConfigRejected`] so the caller can move down the ladder.
    fn create_context(
        &mut self,
        attempt: &ConfigAttempt,
        shared: Option<ContextHandle>,
    ) -> Result<Box<dyn DriverContext>, GraphicsError>;
}

/// Native context bound to the render worker thread
pub trait DriverContext {
    fn handle(&self) -> ContextHandle;

    /// Graphics API version actually obtained
    fn version(&self) -> u32;

    fn create_window_surface(
        &mut self,
        window: &Arc<dyn NativeWindow>,
    ) -> Result<SurfaceKey, GraphicsError>;

    fn create_offscreen_surface(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<SurfaceKey, GraphicsError>;

    fn destroy_surface(&mut self, surface: SurfaceKey);

    fn make_current(&mut self, surface: SurfaceKey) -> Result<(), GraphicsError>;

    /// Detach whatever surface is current
    fn make_default(&mut self);

    /// Pixel size of a surface, `None` once its backing window is gone
    fn surface_size(&self, surface: SurfaceKey) -> Option<(u32, u32)>;

    /// Present the current back buffer; no-op for off-screen surfaces
    fn swap(&mut self, surface: SurfaceKey) -> Result<(), GraphicsError>;

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32);

    /// Clear the current surface to normalized RGBA
    fn clear(&mut self, rgba: [f32; 4]);

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureKey, GraphicsError>;

    /// Replace texture contents with tightly packed RGBA8 rows
    fn upload_texture(
        &mut self,
        texture: TextureKey,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), GraphicsError>;

    fn delete_texture(&mut self, texture: TextureKey);

    /// Draw a full-viewport quad sampling `texture` through `mvp`
    fn draw_texture(&mut self, texture: TextureKey, mvp: &Mat4) -> Result<(), GraphicsError>;

    /// Read RGBA8 pixels of the current surface, first row is the top row
    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>, GraphicsError>;

    fn flush(&mut self);

    /// Block until all submitted work has finished
    fn sync(&mut self);

    fn release(&mut self);
}
