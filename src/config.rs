// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::{self, flags};
use crate::errors::{EngineError, EngineResult};
use crate::gpu::ContextHandle;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Optional buffers and capabilities requested from the graphics context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextFlags {
    /// Depth buffer attached to every surface
    pub depth_buffer: bool,
    /// Surfaces may feed a hardware video encoder
    pub recordable: bool,
    /// 1-bit stencil buffer
    pub stencil_1bit: bool,
    /// 8-bit stencil buffer
    pub stencil_8bit: bool,
}

impl Default for ContextFlags {
    fn default() -> Self {
        Self {
            depth_buffer: false,
            recordable: true,
            stencil_1bit: false,
            stencil_8bit: false,
        }
    }
}

impl ContextFlags {
    /// Decode the construction bit mask; unknown bits are ignored
    pub fn from_bits(bits: u32) -> Self {
        Self {
            depth_buffer: bits & flags::DEPTH_BUFFER != 0,
            recordable: bits & flags::RECORDABLE != 0,
            stencil_1bit: bits & flags::STENCIL_1BIT != 0,
            stencil_8bit: bits & flags::STENCIL_8BIT != 0,
        }
    }

    pub fn bits(&self) -> u32 {
        let mut bits = 0;
        if self.depth_buffer {
            bits |= flags::DEPTH_BUFFER;
        }
        if self.recordable {
            bits |= flags::RECORDABLE;
        }
        if self.stencil_1bit {
            bits |= flags::STENCIL_1BIT;
        }
        if self.stencil_8bit {
            bits |= flags::STENCIL_8BIT;
        }
        bits
    }

    /// Stencil depth to request; 1-bit wins when both are set
    pub fn stencil_bits(&self) -> u8 {
        if self.stencil_1bit {
            1
        } else if self.stencil_8bit {
            8
        } else {
            0
        }
    }
}

/// Construction parameters of a [`RendererHolder`](crate::RendererHolder)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial input surface width (0 selects the default)
    pub width: u32,
    /// Initial input surface height (0 selects the default)
    pub height: u32,
    /// Highest graphics API version to try
    pub max_client_version: u32,
    /// Buffers and capabilities to request
    pub flags: ContextFlags,
    /// Bound of the render worker command queue
    pub command_queue_capacity: usize,
    /// Retry interval of add/remove while the queue is full
    pub registration_retry_ms: u64,
    /// Poll interval of synchronous still capture
    pub capture_poll_ms: u64,
    /// Name given to the render worker thread
    pub thread_name: String,
    /// Context to share textures with; never persisted
    #[serde(skip)]
    pub shared_context: Option<ContextHandle>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: constants::DEFAULT_WIDTH,
            height: constants::DEFAULT_HEIGHT,
            max_client_version: constants::MAX_CLIENT_VERSION,
            flags: ContextFlags::default(),
            command_queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
            registration_retry_ms: constants::REGISTRATION_RETRY_INTERVAL.as_millis() as u64,
            capture_poll_ms: constants::CAPTURE_POLL_INTERVAL.as_millis() as u64,
            thread_name: constants::DEFAULT_THREAD_NAME.to_string(),
            shared_context: None,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidArgument(format!("config: {}", e)))?;
        Ok(config.normalized())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidArgument(format!("config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> EngineResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidArgument(format!("config: {}", e)))
    }

    /// Replace out-of-range values with their defaults
    pub fn normalized(mut self) -> Self {
        if self.width == 0 || self.height == 0 {
            self.width = constants::DEFAULT_WIDTH;
            self.height = constants::DEFAULT_HEIGHT;
        }
        self.max_client_version = self.max_client_version.clamp(
            constants::MIN_CLIENT_VERSION,
            constants::MAX_CLIENT_VERSION,
        );
        if self.command_queue_capacity == 0 {
            self.command_queue_capacity = constants::DEFAULT_QUEUE_CAPACITY;
        }
        if self.registration_retry_ms == 0 {
            self.registration_retry_ms = constants::REGISTRATION_RETRY_INTERVAL.as_millis() as u64;
        }
        if self.capture_poll_ms == 0 {
            self.capture_poll_ms = constants::CAPTURE_POLL_INTERVAL.as_millis() as u64;
        }
        if self.thread_name.is_empty() {
            self.thread_name = constants::DEFAULT_THREAD_NAME.to_string();
        }
        self
    }

    pub fn registration_retry(&self) -> Duration {
        Duration::from_millis(self.registration_retry_ms)
    }

    pub fn capture_poll(&self) -> Duration {
        Duration::from_millis(self.capture_poll_ms)
    }
}
