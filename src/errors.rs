// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the frame distribution engine

use crate::gpu::WindowKind;
use crate::render::DestinationId;
use std::fmt;

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

/// Main engine error type
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Operation invoked after `release()`
    AlreadyReleased,
    /// Destination object is not one of the supported window kinds
    UnsupportedTarget(WindowKind),
    /// A still capture is already pending
    CaptureInProgress,
    /// Render worker could not be started
    StartFailed(String),
    /// Driver refused to bind a destination window
    TargetCreationFailed(DestinationId),
    /// Bad caller-supplied value
    InvalidArgument(String),
    /// A command panicked on the render worker
    WorkerPanicked(String),
    /// Graphics layer errors
    Graphics(GraphicsError),
    /// Still capture errors
    Capture(CaptureError),
}

/// Errors raised by the graphics context and its targets
#[derive(Debug, Clone)]
pub enum GraphicsError {
    /// Every configuration attempt was rejected
    NoUsableConfig,
    /// One configuration attempt was rejected by the driver
    ConfigRejected(String),
    /// Context creation failed for an accepted configuration
    ContextCreationFailed(String),
    /// Context was used after release
    ContextReleased,
    /// Native window cannot back a surface
    BadNativeWindow(String),
    /// Surface allocation failed
    SurfaceCreationFailed(String),
    /// Target was used after release
    TargetReleased,
    /// Target lost its backing window or has zero size
    InvalidTarget,
    /// Texture handle not known to the context
    UnknownTexture,
    /// Framebuffer readback failed
    ReadbackFailed(String),
}

/// Still capture errors
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// File extension does not map to a supported format
    UnknownFormat(String),
    /// Readback produced an empty or mismatched buffer
    InvalidDimensions,
    /// Image encoder failed
    EncodingFailed(String),
    /// Writing the encoded image failed
    Io(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AlreadyReleased => write!(f, "already released"),
            EngineError::UnsupportedTarget(kind) => {
                write!(f, "unsupported target type: {:?}", kind)
            }
            EngineError::CaptureInProgress => write!(f, "capture already in progress"),
            EngineError::StartFailed(msg) => write!(f, "render worker failed to start: {}", msg),
            EngineError::TargetCreationFailed(id) => {
                write!(f, "failed to create target for destination {}", id)
            }
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            EngineError::WorkerPanicked(msg) => write!(f, "render worker panicked: {}", msg),
            EngineError::Graphics(e) => write!(f, "Graphics error: {}", e),
            EngineError::Capture(e) => write!(f, "Capture error: {}", e),
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::NoUsableConfig => write!(f, "no usable graphics configuration"),
            GraphicsError::ConfigRejected(msg) => write!(f, "configuration rejected: {}", msg),
            GraphicsError::ContextCreationFailed(msg) => {
                write!(f, "context creation failed: {}", msg)
            }
            GraphicsError::ContextReleased => write!(f, "context already released"),
            GraphicsError::BadNativeWindow(msg) => write!(f, "bad native window: {}", msg),
            GraphicsError::SurfaceCreationFailed(msg) => {
                write!(f, "surface creation failed: {}", msg)
            }
            GraphicsError::TargetReleased => write!(f, "target already released"),
            GraphicsError::InvalidTarget => write!(f, "target is not valid"),
            GraphicsError::UnknownTexture => write!(f, "unknown texture"),
            GraphicsError::ReadbackFailed(msg) => write!(f, "readback failed: {}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::UnknownFormat(ext) => write!(f, "unknown capture format: {}", ext),
            CaptureError::InvalidDimensions => write!(f, "invalid capture dimensions"),
            CaptureError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            CaptureError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
impl std::error::Error for GraphicsError {}
impl std::error::Error for CaptureError {}

impl From<GraphicsError> for EngineError {
    fn from(err: GraphicsError) -> Self {
        EngineError::Graphics(err)
    }
}

impl From<CaptureError> for EngineError {
    fn from(err: CaptureError) -> Self {
        EngineError::Capture(err)
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::Io(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Capture(CaptureError::Io(err.to_string()))
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::EncodingFailed(err.to_string())
    }
}
