// SPDX-License-Identifier: GPL-3.0-only

//! Input ("master") surface the frame producer writes into

use crate::errors::{EngineError, EngineResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::trace;

/// One decoded RGBA8 frame
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows, top row first
    pub data: Arc<[u8]>,
    /// Producer timestamp in nanoseconds
    pub timestamp_ns: u64,
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("timestamp_ns", &self.timestamp_ns)
            .finish()
    }
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> EngineResult<Self> {
        let data = data.into();
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || data.len() != expected {
            return Err(EngineError::InvalidArgument(format!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
            timestamp_ns: 0,
        })
    }

    /// Frame filled with a single colour
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = vec![rgba; width as usize * height as usize];
        Self {
            width,
            height,
            data: bytemuck::cast_slice::<[u8; 4], u8>(pixels.as_slice()).into(),
            timestamp_ns: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let pixels: &[[u8; 4]] = bytemuck::cast_slice(&self.data[..]);
        pixels.get((y * self.width + x) as usize).copied()
    }
}

type FrameListener = Box<dyn Fn() + Send + Sync>;

struct InputInner {
    latest: Mutex<Option<VideoFrame>>,
    default_size: Mutex<(u32, u32)>,
    valid: AtomicBool,
    frames: AtomicU64,
    listener: FrameListener,
}

/// Producer-facing handle of the master surface
///
/// Cheap to clone. Every [`push_frame`](Self::push_frame) replaces the frame
/// not yet latched by the renderer and schedules a redraw.
#[derive(Clone)]
pub struct InputSurface {
    inner: Arc<InputInner>,
}

impl fmt::Debug for InputSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputSurface")
            .field("default_size", &self.default_size())
            .field("valid", &self.is_valid())
            .field("frames", &self.frames_received())
            .finish()
    }
}

impl InputSurface {
    pub(crate) fn new(width: u32, height: u32, listener: FrameListener) -> Self {
        Self {
            inner: Arc::new(InputInner {
                latest: Mutex::new(None),
                default_size: Mutex::new((width, height)),
                valid: AtomicBool::new(true),
                frames: AtomicU64::new(0),
                listener,
            }),
        }
    }

    /// Deliver a frame and request a redraw
    pub fn push_frame(&self, frame: VideoFrame) -> EngineResult<()> {
        if !self.is_valid() {
            return Err(EngineError::AlreadyReleased);
        }
        *self
            .inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(frame);
        let count = self.inner.frames.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(frame = count, "Input frame available");
        (self.inner.listener)();
        Ok(())
    }

    /// Take the frame not yet latched by the renderer
    pub(crate) fn take_latest(&self) -> Option<VideoFrame> {
        self.inner
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Size producers should render at
    pub fn default_size(&self) -> (u32, u32) {
        *self
            .inner
            .default_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_default_size(&self, width: u32, height: u32) {
        *self
            .inner
            .default_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = (width, height);
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::Acquire)
    }

    pub fn frames_received(&self) -> u64 {
        self.inner.frames.load(Ordering::Acquire)
    }

    /// Invalidate the surface; the renderer recreates it on the next draw
    pub fn release(&self) {
        if self.inner.valid.swap(false, Ordering::AcqRel) {
            self.take_latest();
        }
    }

    /// Whether two handles refer to the same surface
    pub fn same_surface(&self, other: &InputSurface) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_surface() -> (InputSurface, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let surface = InputSurface::new(
            4,
            2,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (surface, calls)
    }

    #[test]
    fn frame_length_is_validated() {
        assert!(VideoFrame::new(2, 2, vec![0u8; 16]).is_ok());
        assert!(VideoFrame::new(2, 2, vec![0u8; 15]).is_err());
        assert!(VideoFrame::new(0, 2, Vec::<u8>::new()).is_err());
    }

    #[test]
    fn solid_frame_pixels() {
        let frame = VideoFrame::solid(3, 2, [1, 2, 3, 4]).with_timestamp(99);
        assert_eq!(frame.data.len(), 24);
        assert_eq!(frame.pixel(2, 1), Some([1, 2, 3, 4]));
        assert_eq!(frame.pixel(3, 0), None);
        assert_eq!(frame.timestamp_ns, 99);
    }

    #[test]
    fn push_keeps_only_latest_and_notifies() {
        let (surface, calls) = counting_surface();
        surface.push_frame(VideoFrame::solid(1, 1, [1, 0, 0, 255])).unwrap();
        surface.push_frame(VideoFrame::solid(1, 1, [2, 0, 0, 255])).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(surface.frames_received(), 2);
        let latest = surface.take_latest().unwrap();
        assert_eq!(latest.pixel(0, 0), Some([2, 0, 0, 255]));
        assert!(surface.take_latest().is_none());
    }

    #[test]
    fn released_surface_rejects_frames() {
        let (surface, calls) = counting_surface();
        surface.release();
        assert!(!surface.is_valid());
        assert!(matches!(
            surface.push_frame(VideoFrame::solid(1, 1, [0; 4])),
            Err(EngineError::AlreadyReleased)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn default_size_updates() {
        let (surface, _) = counting_surface();
        assert_eq!(surface.default_size(), (4, 2));
        surface.set_default_size(8, 8);
        assert_eq!(surface.clone().default_size(), (8, 8));
    }
}
