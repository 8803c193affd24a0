// SPDX-License-Identifier: GPL-3.0-only

//! CPU reference driver
//!
//! [`SoftwareWindow`] is an in-memory image-stream window. Every driver in
//! this crate presents into it, so it also serves as the destination type of
//! the wgpu driver.
//!
//! Surfaces are RGBA8 buffers. Drawing samples the source texture with
//! nearest filtering through the inverse of the 2-D part of the MVP, which
//! is enough to observe transforms, mirroring and clears in tests.

use super::{
    ConfigAttempt, ContextHandle, DriverContext, GraphicsDriver, Mat4, NativeWindow, SurfaceKey,
    TextureKey, WindowKind,
};
use crate::errors::GraphicsError;
use crate::gpu::ColorFormat;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

static NEXT_CONTEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Byte length of a tightly packed RGBA8 image
fn rgba_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Which configurations the driver pretends to support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptPolicy {
    /// Highest API version accepted
    pub max_version: u32,
    /// Refuse configurations asking for a recordable surface
    pub reject_recordable: bool,
    /// Refuse 32-bit colour configurations
    pub reject_rgba8888: bool,
    /// Refuse everything
    pub reject_all: bool,
    /// Fail every window surface allocation
    pub fail_window_surfaces: bool,
    /// Fail every texture upload
    pub fail_texture_uploads: bool,
}

impl Default for AcceptPolicy {
    fn default() -> Self {
        Self {
            max_version: 3,
            reject_recordable: false,
            reject_rgba8888: false,
            reject_all: false,
            fail_window_surfaces: false,
            fail_texture_uploads: false,
        }
    }
}

/// Live object counters shared between a driver and its contexts
#[derive(Debug, Default)]
pub struct DriverStats {
    live_contexts: AtomicUsize,
    live_surfaces: AtomicUsize,
    live_textures: AtomicUsize,
}

impl DriverStats {
    pub fn live_contexts(&self) -> usize {
        self.live_contexts.load(Ordering::SeqCst)
    }

    pub fn live_surfaces(&self) -> usize {
        self.live_surfaces.load(Ordering::SeqCst)
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct SoftwareDriver {
    policy: AcceptPolicy,
    stats: Arc<DriverStats>,
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: AcceptPolicy) -> Self {
        Self {
            policy,
            stats: Arc::default(),
        }
    }

    /// Counters that stay readable after the driver moved to the worker
    pub fn stats(&self) -> Arc<DriverStats> {
        Arc::clone(&self.stats)
    }

    fn check(&self, attempt: &ConfigAttempt) -> Result<(), GraphicsError> {
        let policy = &self.policy;
        if policy.reject_all {
            return Err(GraphicsError::ConfigRejected("driver refuses all".into()));
        }
        if attempt.version > policy.max_version {
            return Err(GraphicsError::ConfigRejected(format!(
                "version {} unsupported",
                attempt.version
            )));
        }
        if attempt.recordable && policy.reject_recordable {
            return Err(GraphicsError::ConfigRejected("recordable unsupported".into()));
        }
        if attempt.color == ColorFormat::Rgba8888 && policy.reject_rgba8888 {
            return Err(GraphicsError::ConfigRejected("RGBA8888 unsupported".into()));
        }
        Ok(())
    }
}

impl GraphicsDriver for SoftwareDriver {
    fn name(&self) -> &str {
        "software"
    }

    fn create_context(
        &mut self,
        attempt: &ConfigAttempt,
        shared: Option<ContextHandle>,
    ) -> Result<Box<dyn DriverContext>, GraphicsError> {
        self.check(attempt)?;
        let handle = ContextHandle(NEXT_CONTEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
        self.stats.live_contexts.fetch_add(1, Ordering::SeqCst);
        debug!(?handle, ?shared, version = attempt.version, "Software context created");
        Ok(Box::new(SoftwareContext {
            handle,
            version: attempt.version,
            policy: self.policy,
            stats: Arc::clone(&self.stats),
            surfaces: HashMap::new(),
            textures: HashMap::new(),
            next_key: 1,
            current: None,
            viewport: (0, 0, 0, 0),
            released: false,
        }))
    }
}

/// Snapshot of what a window last presented
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PresentedFrame {
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let pixels: &[[u8; 4]] = bytemuck::cast_slice(&self.data[..]);
        pixels.get(y as usize * self.width as usize + x as usize).copied()
    }
}

#[derive(Debug)]
struct WindowState {
    width: u32,
    height: u32,
    destroyed: bool,
    presented: u64,
    last_frame: Option<PresentedFrame>,
}

/// In-memory window that records every presented frame
#[derive(Debug)]
pub struct SoftwareWindow {
    kind: WindowKind,
    state: Mutex<WindowState>,
}

impl SoftwareWindow {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Self::with_kind(width, height, WindowKind::Window)
    }

    pub fn with_kind(width: u32, height: u32, kind: WindowKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            state: Mutex::new(WindowState {
                width,
                height,
                destroyed: false,
                presented: 0,
                last_frame: None,
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn presented_frames(&self) -> u64 {
        self.state().presented
    }

    pub fn last_frame(&self) -> Option<PresentedFrame> {
        self.state().last_frame.clone()
    }

    pub fn size(&self) -> (u32, u32) {
        let state = self.state();
        (state.width, state.height)
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state();
        state.width = width;
        state.height = height;
    }

    /// Tear the window down from the owner's side
    pub fn destroy(&self) {
        self.state().destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().destroyed
    }

    /// Size while the window is alive
    pub(crate) fn live_size(&self) -> Option<(u32, u32)> {
        let state = self.state();
        (!state.destroyed).then_some((state.width, state.height))
    }

    pub(crate) fn present(
        &self,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state();
        if state.destroyed {
            return Err(GraphicsError::InvalidTarget);
        }
        state.presented += 1;
        state.last_frame = Some(PresentedFrame {
            width,
            height,
            data: data.to_vec(),
        });
        Ok(())
    }
}

impl NativeWindow for SoftwareWindow {
    fn kind(&self) -> WindowKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

enum Backing {
    Window(Arc<dyn NativeWindow>),
    Offscreen,
}

struct SoftSurface {
    backing: Backing,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl SoftSurface {
    fn window(&self) -> Option<&SoftwareWindow> {
        match &self.backing {
            Backing::Window(window) => window.as_any().downcast_ref::<SoftwareWindow>(),
            Backing::Offscreen => None,
        }
    }

    fn live_size(&self) -> Option<(u32, u32)> {
        match self.window() {
            Some(window) => window.live_size(),
            None => Some((self.width, self.height)),
        }
    }

    /// Follow the backing window's size
    fn sync_size(&mut self) {
        if let Some((width, height)) = self.window().and_then(SoftwareWindow::live_size)
            && (width, height) != (self.width, self.height)
        {
            self.width = width;
            self.height = height;
            self.pixels = vec![0; rgba_len(width, height)];
        }
    }
}

struct SoftTexture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

pub struct SoftwareContext {
    handle: ContextHandle,
    version: u32,
    policy: AcceptPolicy,
    stats: Arc<DriverStats>,
    surfaces: HashMap<SurfaceKey, SoftSurface>,
    textures: HashMap<TextureKey, SoftTexture>,
    next_key: u64,
    current: Option<SurfaceKey>,
    viewport: (i32, i32, u32, u32),
    released: bool,
}

impl SoftwareContext {
    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    fn insert_surface(&mut self, surface: SoftSurface) -> SurfaceKey {
        let key = self.next_key();
        self.surfaces.insert(key, surface);
        self.stats.live_surfaces.fetch_add(1, Ordering::SeqCst);
        key
    }

    fn current_surface(&mut self) -> Option<&mut SoftSurface> {
        let key = self.current?;
        self.surfaces.get_mut(&key)
    }

    /// Viewport clipped to the current surface
    fn viewport_rect(&self, surface: &SoftSurface) -> (u32, u32, u32, u32) {
        let (x, y, w, h) = self.viewport;
        let x0 = x.max(0) as u32;
        let y0 = y.max(0) as u32;
        let x1 = (x0 + w).min(surface.width);
        let y1 = (y0 + h).min(surface.height);
        (x0.min(x1), y0.min(y1), x1, y1)
    }
}

impl DriverContext for SoftwareContext {
    fn handle(&self) -> ContextHandle {
        self.handle
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn create_window_surface(
        &mut self,
        window: &Arc<dyn NativeWindow>,
    ) -> Result<SurfaceKey, GraphicsError> {
        if self.policy.fail_window_surfaces {
            return Err(GraphicsError::SurfaceCreationFailed(
                "window surfaces disabled".into(),
            ));
        }
        let Some(soft) = window.as_any().downcast_ref::<SoftwareWindow>() else {
            return Err(GraphicsError::BadNativeWindow(
                "not a software window".into(),
            ));
        };
        let (width, height) = soft
            .live_size()
            .ok_or_else(|| GraphicsError::BadNativeWindow("window destroyed".into()))?;
        let key = self.insert_surface(SoftSurface {
            backing: Backing::Window(Arc::clone(window)),
            width,
            height,
            pixels: vec![0; rgba_len(width, height)],
        });
        trace!(surface = key, width, height, "Window surface created");
        Ok(key)
    }

    fn create_offscreen_surface(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<SurfaceKey, GraphicsError> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::SurfaceCreationFailed(format!(
                "invalid size {}x{}",
                width, height
            )));
        }
        Ok(self.insert_surface(SoftSurface {
            backing: Backing::Offscreen,
            width,
            height,
            pixels: vec![0; rgba_len(width, height)],
        }))
    }

    fn destroy_surface(&mut self, surface: SurfaceKey) {
        if self.surfaces.remove(&surface).is_some() {
            self.stats.live_surfaces.fetch_sub(1, Ordering::SeqCst);
        }
        if self.current == Some(surface) {
            self.current = None;
        }
    }

    fn make_current(&mut self, surface: SurfaceKey) -> Result<(), GraphicsError> {
        let entry = self
            .surfaces
            .get_mut(&surface)
            .ok_or(GraphicsError::InvalidTarget)?;
        if entry.live_size().is_none() {
            return Err(GraphicsError::InvalidTarget);
        }
        entry.sync_size();
        self.current = Some(surface);
        self.viewport = (0, 0, entry.width, entry.height);
        Ok(())
    }

    fn make_default(&mut self) {
        self.current = None;
    }

    fn surface_size(&self, surface: SurfaceKey) -> Option<(u32, u32)> {
        self.surfaces.get(&surface)?.live_size()
    }

    fn swap(&mut self, surface: SurfaceKey) -> Result<(), GraphicsError> {
        let entry = self
            .surfaces
            .get(&surface)
            .ok_or(GraphicsError::InvalidTarget)?;
        match entry.window() {
            Some(window) => window.present(entry.width, entry.height, &entry.pixels),
            None => Ok(()),
        }
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        let color = rgba.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        if let Some(surface) = self.current_surface() {
            let pixels: &mut [[u8; 4]] = bytemuck::cast_slice_mut(surface.pixels.as_mut_slice());
            pixels.fill(color);
        }
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureKey, GraphicsError> {
        let key = self.next_key();
        self.textures.insert(
            key,
            SoftTexture {
                width,
                height,
                pixels: vec![0; rgba_len(width, height)],
            },
        );
        self.stats.live_textures.fetch_add(1, Ordering::SeqCst);
        Ok(key)
    }

    fn upload_texture(
        &mut self,
        texture: TextureKey,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), GraphicsError> {
        if self.policy.fail_texture_uploads {
            return Err(GraphicsError::SurfaceCreationFailed(
                "texture uploads disabled".into(),
            ));
        }
        let expected = rgba_len(width, height);
        if rgba.len() != expected {
            return Err(GraphicsError::SurfaceCreationFailed(format!(
                "texture data is {} bytes, expected {}",
                rgba.len(),
                expected
            )));
        }
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or(GraphicsError::UnknownTexture)?;
        entry.width = width;
        entry.height = height;
        entry.pixels.clear();
        entry.pixels.extend_from_slice(rgba);
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureKey) {
        if self.textures.remove(&texture).is_some() {
            self.stats.live_textures.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn draw_texture(&mut self, texture: TextureKey, mvp: &Mat4) -> Result<(), GraphicsError> {
        let Some(inverse) = mvp.affine_inverse_2d() else {
            return Ok(());
        };
        let source = self
            .textures
            .get(&texture)
            .ok_or(GraphicsError::UnknownTexture)?;
        if source.width == 0 || source.height == 0 {
            return Ok(());
        }
        let key = self.current.ok_or(GraphicsError::InvalidTarget)?;
        let surface = self.surfaces.get(&key).ok_or(GraphicsError::InvalidTarget)?;
        let (x0, y0, x1, y1) = self.viewport_rect(surface);
        let (vw, vh) = ((x1 - x0) as f32, (y1 - y0) as f32);
        let stride = surface.width;

        let src: &[[u8; 4]] = bytemuck::cast_slice(source.pixels.as_slice());
        let (sw, sh) = (source.width, source.height);
        let surface = self
            .surfaces
            .get_mut(&key)
            .ok_or(GraphicsError::InvalidTarget)?;
        let dst: &mut [[u8; 4]] = bytemuck::cast_slice_mut(surface.pixels.as_mut_slice());

        for py in y0..y1 {
            let cy = 1.0 - ((py - y0) as f32 + 0.5) / vh * 2.0;
            for px in x0..x1 {
                let cx = ((px - x0) as f32 + 0.5) / vw * 2.0 - 1.0;
                let (sx, sy) = inverse.transform_point(cx, cy);
                if !(-1.0..=1.0).contains(&sx) || !(-1.0..=1.0).contains(&sy) {
                    continue;
                }
                let u = (((sx + 1.0) * 0.5 * sw as f32) as u32).min(sw - 1);
                let v = (((1.0 - sy) * 0.5 * sh as f32) as u32).min(sh - 1);
                dst[py as usize * stride as usize + px as usize] =
                    src[v as usize * sw as usize + u as usize];
            }
        }
        Ok(())
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>, GraphicsError> {
        let surface = self
            .current_surface()
            .ok_or_else(|| GraphicsError::ReadbackFailed("no current surface".into()))?;
        if width > surface.width || height > surface.height {
            return Err(GraphicsError::ReadbackFailed(format!(
                "{}x{} exceeds surface {}x{}",
                width, height, surface.width, surface.height
            )));
        }
        let row = surface.width as usize * 4;
        let wanted = width as usize * 4;
        let mut out = Vec::with_capacity(wanted * height as usize);
        for y in 0..height as usize {
            out.extend_from_slice(&surface.pixels[y * row..y * row + wanted]);
        }
        Ok(out)
    }

    fn flush(&mut self) {}

    fn sync(&mut self) {}

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.current = None;
        let surfaces = self.surfaces.len();
        let textures = self.textures.len();
        self.surfaces.clear();
        self.textures.clear();
        self.stats.live_surfaces.fetch_sub(surfaces, Ordering::SeqCst);
        self.stats.live_textures.fetch_sub(textures, Ordering::SeqCst);
        self.stats.live_contexts.fetch_sub(1, Ordering::SeqCst);
        debug!(handle = ?self.handle, "Software context released");
    }
}

impl Drop for SoftwareContext {
    fn drop(&mut self) {
        self.release();
    }
}
