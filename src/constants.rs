// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use std::time::Duration;

/// Default input surface width when the caller passes a non-positive size
pub const DEFAULT_WIDTH: u32 = 640;

/// Default input surface height when the caller passes a non-positive size
pub const DEFAULT_HEIGHT: u32 = 480;

/// Highest graphics API version the context ladder starts from
pub const MAX_CLIENT_VERSION: u32 = 3;

/// Lowest graphics API version the ladder will accept
pub const MIN_CLIENT_VERSION: u32 = 1;

/// Size of the default off-screen target kept current between commands
pub const DEFAULT_TARGET_SIZE: u32 = 1;

/// Default bound of the render worker command queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Re-attempt interval for blocking registry mutations when the queue is full
pub const REGISTRATION_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Liveness poll interval of synchronous still capture
pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default name of the render worker thread
pub const DEFAULT_THREAD_NAME: &str = "RendererHolder";

/// Still capture quality used when the caller does not pick one
pub const DEFAULT_CAPTURE_QUALITY: u8 = 80;

/// Quality substituted for values outside 1..=99
pub const FALLBACK_CAPTURE_QUALITY: u8 = 90;

/// Context flag bits, same values as the construction bit mask
pub mod flags {
    /// Request a depth buffer
    pub const DEPTH_BUFFER: u32 = 0x01;
    /// Request a surface that can feed a video encoder
    pub const RECORDABLE: u32 = 0x02;
    /// Request a 1-bit stencil buffer
    pub const STENCIL_1BIT: u32 = 0x04;
    /// Request an 8-bit stencil buffer
    pub const STENCIL_8BIT: u32 = 0x20;
}

/// Normalize a still capture quality into 1..=99
pub fn clamp_capture_quality(quality: i32) -> u8 {
    if quality <= 0 || quality >= 100 {
        FALLBACK_CAPTURE_QUALITY
    } else {
        quality as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_out_of_range_falls_back() {
        assert_eq!(clamp_capture_quality(0), FALLBACK_CAPTURE_QUALITY);
        assert_eq!(clamp_capture_quality(-5), FALLBACK_CAPTURE_QUALITY);
        assert_eq!(clamp_capture_quality(100), FALLBACK_CAPTURE_QUALITY);
        assert_eq!(clamp_capture_quality(1), 1);
        assert_eq!(clamp_capture_quality(99), 99);
        assert_eq!(clamp_capture_quality(80), 80);
    }
}
