// SPDX-License-Identifier: GPL-3.0-only

//! wgpu-backed driver
//!
//! Every engine gets its own device and queue, unless it is built with the
//! handle of a live wgpu context. In that case the existing device is reused
//! so both engines can exchange resources. Surfaces are `Rgba8Unorm` render
//! targets. Window surfaces present by reading the target back into a
//! [`SoftwareWindow`], which makes them image-stream destinations.
//!
//! The configuration ladder maps onto wgpu as follows:
//!
//! - API versions 3, 2 and 1 request the full, downlevel and WebGL2 limit sets
//! - 16-bit colour attempts fall back to the software adapter; wgpu has no
//!   16-bit render target, so rendering itself stays RGBA8
//! - recordable targets need nothing extra since every target allows copies

use super::software::SoftwareWindow;
use super::{
    ColorFormat, ConfigAttempt, ContextHandle, DriverContext, GraphicsDriver, Mat4, NativeWindow,
    SurfaceKey, TextureKey,
};
use crate::errors::GraphicsError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace, warn};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

// Kept apart from the software driver's handles
static NEXT_CONTEXT_HANDLE: AtomicU64 = AtomicU64::new(1 << 32);

type SharedDevices = HashMap<ContextHandle, (wgpu::Device, wgpu::Queue)>;

/// Devices of live contexts, keyed by their handle
static SHARED_DEVICES: LazyLock<Mutex<SharedDevices>> = LazyLock::new(Mutex::default);

fn shared_devices() -> MutexGuard<'static, SharedDevices> {
    SHARED_DEVICES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Device limits requested for a graphics API version
fn limits_for_version(version: u32) -> wgpu::Limits {
    match version {
        0..=1 => wgpu::Limits::downlevel_webgl2_defaults(),
        2 => wgpu::Limits::downlevel_defaults(),
        _ => wgpu::Limits::default(),
    }
}

/// Row pitch of a readback buffer; `copy_texture_to_buffer` needs it aligned
fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// Transform uniform (must match `Transform` in blit.wgsl)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct TransformUniform {
    /// Column-major
    mvp: [[f32; 4]; 4],
}

impl From<&Mat4> for TransformUniform {
    fn from(matrix: &Mat4) -> Self {
        let mut mvp = [[0.0; 4]; 4];
        for (col, column) in mvp.iter_mut().enumerate() {
            for (row, value) in column.iter_mut().enumerate() {
                *value = matrix.get(row, col);
            }
        }
        Self { mvp }
    }
}

/// Creates one wgpu device per engine
pub struct WgpuDriver {
    instance: wgpu::Instance,
    power_preference: wgpu::PowerPreference,
}

impl Default for WgpuDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuDriver {
    pub fn new() -> Self {
        Self::with_backends(wgpu::Backends::VULKAN)
    }

    pub fn with_backends(backends: wgpu::Backends) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        Self {
            instance,
            power_preference: wgpu::PowerPreference::HighPerformance,
        }
    }

    pub fn power_preference(mut self, preference: wgpu::PowerPreference) -> Self {
        self.power_preference = preference;
        self
    }
}

impl GraphicsDriver for WgpuDriver {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_context(
        &mut self,
        attempt: &ConfigAttempt,
        shared: Option<ContextHandle>,
    ) -> Result<Box<dyn DriverContext>, GraphicsError> {
        if let Some(handle) = shared {
            let existing = shared_devices().get(&handle).cloned();
            match existing {
                Some((device, queue)) => {
                    debug!(?handle, "Reusing device of shared context");
                    return Ok(Box::new(WgpuContext::new(
                        device,
                        queue,
                        attempt.version,
                        false,
                    )));
                }
                None => warn!(
                    ?handle,
                    "Shared context is not a live wgpu context, creating a new device"
                ),
            }
        }

        let adapter = pollster::block_on(self.instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: self.power_preference,
                compatible_surface: None,
                force_fallback_adapter: attempt.color == ColorFormat::Rgb565,
            },
        ))
        .map_err(|e| GraphicsError::ConfigRejected(format!("no suitable GPU adapter: {}", e)))?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            version = attempt.version,
            "GPU adapter selected"
        );

        let required_limits = limits_for_version(attempt.version).using_resolution(adapter.limits());
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("frame-fanout"),
            required_features: wgpu::Features::empty(),
            required_limits,
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| GraphicsError::ConfigRejected(format!("failed to create GPU device: {}", e)))?;

        Ok(Box::new(WgpuContext::new(
            device,
            queue,
            attempt.version,
            true,
        )))
    }
}

struct GpuSurface {
    window: Option<Arc<dyn NativeWindow>>,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl GpuSurface {
    fn window(&self) -> Option<&SoftwareWindow> {
        self.window.as_ref()?.as_any().downcast_ref::<SoftwareWindow>()
    }

    fn live_size(&self) -> Option<(u32, u32)> {
        match &self.window {
            Some(_) => self.window()?.live_size(),
            None => Some((self.width, self.height)),
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

/// Context over one wgpu device; lives on the render worker
pub struct WgpuContext {
    handle: ContextHandle,
    version: u32,
    owns_device: bool,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform: wgpu::Buffer,
    surfaces: HashMap<SurfaceKey, GpuSurface>,
    textures: HashMap<TextureKey, GpuTexture>,
    next_key: u64,
    current: Option<SurfaceKey>,
    viewport: (i32, i32, u32, u32),
    released: bool,
}

impl WgpuContext {
    fn new(device: wgpu::Device, queue: wgpu::Queue, version: u32, owns_device: bool) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit bind group layout"),
            entries: &[
                // Input texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                // MVP uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blit pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("blit pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blit sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blit transform"),
            size: std::mem::size_of::<TransformUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let handle = ContextHandle(NEXT_CONTEXT_HANDLE.fetch_add(1, Ordering::Relaxed));
        if owns_device {
            shared_devices().insert(handle, (device.clone(), queue.clone()));
        }
        debug!(?handle, version, owns_device, "wgpu context created");

        Self {
            handle,
            version,
            owns_device,
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            uniform,
            surfaces: HashMap::new(),
            textures: HashMap::new(),
            next_key: 1,
            current: None,
            viewport: (0, 0, 0, 0),
            released: false,
        }
    }

    fn next_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    fn render_target(&self, width: u32, height: u32) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("output target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn input_texture(&self, width: u32, height: u32) -> GpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("input texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform.as_entire_binding(),
                },
            ],
        });
        GpuTexture {
            texture,
            bind_group,
            width,
            height,
        }
    }

    fn insert_surface(&mut self, window: Option<Arc<dyn NativeWindow>>, width: u32, height: u32) -> SurfaceKey {
        let (texture, view) = self.render_target(width, height);
        let key = self.next_key();
        self.surfaces.insert(
            key,
            GpuSurface {
                window,
                texture,
                view,
                width,
                height,
            },
        );
        key
    }

    fn current_surface(&self) -> Result<&GpuSurface, GraphicsError> {
        self.current
            .and_then(|key| self.surfaces.get(&key))
            .ok_or(GraphicsError::InvalidTarget)
    }

    /// Viewport clipped to the surface, `None` when nothing is left
    fn viewport_rect(&self, surface: &GpuSurface) -> Option<(u32, u32, u32, u32)> {
        let (x, y, w, h) = self.viewport;
        let x0 = (x.max(0) as u32).min(surface.width);
        let y0 = (y.max(0) as u32).min(surface.height);
        let x1 = x0.saturating_add(w).min(surface.width);
        let y1 = y0.saturating_add(h).min(surface.height);
        (x1 > x0 && y1 > y0).then_some((x0, y0, x1 - x0, y1 - y0))
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Copy the top-left `width` x `height` of `texture` to the CPU
    fn read_texture(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, GraphicsError> {
        let padded_bytes_per_row = padded_bytes_per_row(width);
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.encoder("readback encoder");
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GraphicsError::ReadbackFailed(format!("device poll failed: {}", e)))?;
        pollster::block_on(receiver)
            .map_err(|_| GraphicsError::ReadbackFailed("mapping callback dropped".into()))?
            .map_err(|e| GraphicsError::ReadbackFailed(format!("failed to map buffer: {}", e)))?;

        // Strip the row padding
        let row = width as usize * 4;
        let data = buffer_slice.get_mapped_range();
        let mut pixels = Vec::with_capacity(row * height as usize);
        for padded_row in data.chunks(padded_bytes_per_row as usize).take(height as usize) {
            pixels.extend_from_slice(&padded_row[..row]);
        }
        drop(data);
        staging_buffer.unmap();
        Ok(pixels)
    }
}

impl DriverContext for WgpuContext {
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
        let Some(sink) = window.as_any().downcast_ref::<SoftwareWindow>() else {
            return Err(GraphicsError::BadNativeWindow(
                "wgpu driver presents into image-stream windows only".into(),
            ));
        };
        let (width, height) = sink
            .live_size()
            .filter(|&(width, height)| width > 0 && height > 0)
            .ok_or_else(|| GraphicsError::BadNativeWindow("window destroyed or empty".into()))?;
        let key = self.insert_surface(Some(Arc::clone(window)), width, height);
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
        Ok(self.insert_surface(None, width, height))
    }

    fn destroy_surface(&mut self, surface: SurfaceKey) {
        if let Some(entry) = self.surfaces.remove(&surface) {
            entry.texture.destroy();
        }
        if self.current == Some(surface) {
            self.current = None;
        }
    }

    fn make_current(&mut self, surface: SurfaceKey) -> Result<(), GraphicsError> {
        let (width, height) = self
            .surfaces
            .get(&surface)
            .ok_or(GraphicsError::InvalidTarget)?
            .live_size()
            .filter(|&(width, height)| width > 0 && height > 0)
            .ok_or(GraphicsError::InvalidTarget)?;

        // Follow the backing window's size
        let resized = self
            .surfaces
            .get(&surface)
            .is_some_and(|entry| (entry.width, entry.height) != (width, height));
        if resized {
            let (texture, view) = self.render_target(width, height);
            if let Some(entry) = self.surfaces.get_mut(&surface) {
                entry.texture.destroy();
                entry.texture = texture;
                entry.view = view;
                entry.width = width;
                entry.height = height;
            }
            trace!(surface, width, height, "Window surface resized");
        }

        self.current = Some(surface);
        self.viewport = (0, 0, width, height);
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
        let Some(window) = entry.window() else {
            return Ok(());
        };
        let pixels = self.read_texture(&entry.texture, entry.width, entry.height)?;
        window.present(entry.width, entry.height, &pixels)
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: u32, height: u32) {
        self.viewport = (x, y, width, height);
    }

    fn clear(&mut self, rgba: [f32; 4]) {
        let Ok(surface) = self.current_surface() else {
            return;
        };
        let [r, g, b, a] = rgba.map(|c| f64::from(c.clamp(0.0, 1.0)));
        let mut encoder = self.encoder("clear encoder");
        {
            let _render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureKey, GraphicsError> {
        let texture = self.input_texture(width.max(1), height.max(1));
        let key = self.next_key();
        self.textures.insert(key, texture);
        Ok(key)
    }

    fn upload_texture(
        &mut self,
        texture: TextureKey,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<(), GraphicsError> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected || expected == 0 {
            return Err(GraphicsError::SurfaceCreationFailed(format!(
                "texture data is {} bytes, expected {}",
                rgba.len(),
                expected
            )));
        }
        let size = self
            .textures
            .get(&texture)
            .map(|entry| (entry.width, entry.height))
            .ok_or(GraphicsError::UnknownTexture)?;
        if size != (width, height) {
            let replacement = self.input_texture(width, height);
            if let Some(old) = self.textures.insert(texture, replacement) {
                old.texture.destroy();
            }
        }
        let entry = self
            .textures
            .get(&texture)
            .ok_or(GraphicsError::UnknownTexture)?;

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn delete_texture(&mut self, texture: TextureKey) {
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn draw_texture(&mut self, texture: TextureKey, mvp: &Mat4) -> Result<(), GraphicsError> {
        let source = self
            .textures
            .get(&texture)
            .ok_or(GraphicsError::UnknownTexture)?;
        let surface = self.current_surface()?;
        let Some((x, y, width, height)) = self.viewport_rect(surface) else {
            return Ok(());
        };

        self.queue.write_buffer(
            &self.uniform,
            0,
            bytemuck::bytes_of(&TransformUniform::from(mvp)),
        );

        let mut encoder = self.encoder("blit encoder");
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blit pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &surface.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_viewport(
                x as f32,
                y as f32,
                width as f32,
                height as f32,
                0.0,
                1.0,
            );
            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &source.bind_group, &[]);
            render_pass.draw(0..6, 0..1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, width: u32, height: u32) -> Result<Vec<u8>, GraphicsError> {
        let surface = self
            .current_surface()
            .map_err(|_| GraphicsError::ReadbackFailed("no current surface".into()))?;
        if width == 0 || height == 0 || width > surface.width || height > surface.height {
            return Err(GraphicsError::ReadbackFailed(format!(
                "{}x{} does not fit surface {}x{}",
                width, height, surface.width, surface.height
            )));
        }
        self.read_texture(&surface.texture, width, height)
    }

    fn flush(&mut self) {
        self.queue.submit(std::iter::empty());
    }

    fn sync(&mut self) {
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            warn!(error = %e, "Waiting for the GPU failed");
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.current = None;
        for (_, surface) in self.surfaces.drain() {
            surface.texture.destroy();
        }
        for (_, texture) in self.textures.drain() {
            texture.texture.destroy();
        }
        if self.owns_device {
            shared_devices().remove(&self.handle);
        }
        debug!(handle = ?self.handle, "wgpu context released");
    }
}

impl Drop for WgpuContext {
    fn drop(&mut self) {
        self.release();
    }
}
