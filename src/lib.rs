// SPDX-License-Identifier: GPL-3.0-only

//! Frame Fanout - distributes one video stream to many output surfaces
//!
//! A producer writes frames into a single input surface. A dedicated render
//! thread owns the graphics context and redraws the latest frame into every
//! registered destination, each with its own transform and optional frame
//! rate ceiling. Still images can be captured from the stream at any time.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`holder`]: Thread-safe facade used by callers
//! - [`render`]: Command queue, surface registry and the render worker
//! - [`gpu`]: Graphics context manager, output targets and the driver seam
//! - [`pipelines`]: Still capture and encoding
//! - [`config`]: Engine configuration
//! - [`callback`]: Observer hooks invoked from the render thread
//!
//! # Example
//!
//! ```no_run
//! use frame_fanout::gpu::software::{SoftwareDriver, SoftwareWindow};
//! use frame_fanout::RendererHolder;
//!
//! let holder = RendererHolder::new(SoftwareDriver::new(), 1280, 720, None)?;
//! holder.add_destination(1, SoftwareWindow::new(640, 360), Some(15))?;
//! holder.release();
//! # Ok::<(), frame_fanout::EngineError>(())
//! ```

pub mod callback;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod holder;
pub mod pipelines;
pub mod render;

// Re-export commonly used types
pub use callback::RenderHolderCallback;
pub use config::{ContextFlags, EngineConfig};
pub use errors::{CaptureError, EngineError, EngineResult, GraphicsError};
pub use gpu::{Color, ContextHandle, Mat4, MirrorMode, NativeWindow, WindowKind};
pub use holder::{RendererHolder, RendererHolderBuilder};
pub use pipelines::still::StillFormat;
pub use render::{
    DestinationId, InputSurface, LoopAction, RunState, VideoFrame, WorkerErrorPolicy,
    WorkerState,
};
