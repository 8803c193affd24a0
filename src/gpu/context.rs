// SPDX-License-Identifier: GPL-3.0-only

//! Graphics context manager
//!
//! Context creation walks an ordered list of [`ConfigAttempt`]s and keeps the
//! first one the driver accepts. Some vendor drivers reject valid attribute
//! combinations, so the ladder degrades the API version, then drops the
//! recordable capability, then falls back to 16-bit colour.

use super::{ContextHandle, DriverContext, GraphicsDriver, SurfaceKey};
use crate::config::ContextFlags;
use crate::constants::{DEFAULT_TARGET_SIZE, MIN_CLIENT_VERSION};
use crate::errors::GraphicsError;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    Rgba8888,
    Rgb565,
}

/// One configuration tried against the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigAttempt {
    pub version: u32,
    pub color: ColorFormat,
    pub depth_buffer: bool,
    pub stencil_bits: u8,
    pub recordable: bool,
}

impl ConfigAttempt {
    /// Ordered attempts from most to least capable
    pub fn ladder(max_version: u32, flags: &ContextFlags) -> Vec<ConfigAttempt> {
        let max_version = max_version.max(MIN_CLIENT_VERSION);
        let recordable_options: &[bool] = if flags.recordable {
            &[true, false]
        } else {
            &[false]
        };

        let mut attempts = Vec::new();
        for color in [ColorFormat::Rgba8888, ColorFormat::Rgb565] {
            for version in (MIN_CLIENT_VERSION..=max_version).rev() {
                for &recordable in recordable_options {
                    attempts.push(ConfigAttempt {
                        version,
                        color,
                        depth_buffer: flags.depth_buffer,
                        stencil_bits: flags.stencil_bits(),
                        recordable,
                    });
                }
            }
        }
        attempts
    }
}

/// The single native context owned by the render worker
pub struct GraphicsContext {
    inner: Option<Box<dyn DriverContext>>,
    attempt: ConfigAttempt,
    handle: ContextHandle,
    default_surface: SurfaceKey,
}

impl GraphicsContext {
    /// Create the context and its 1x1 default off-screen target
    pub fn create(
        driver: &mut dyn GraphicsDriver,
        max_version: u32,
        shared: Option<ContextHandle>,
        flags: &ContextFlags,
    ) -> Result<Self, GraphicsError> {
        for attempt in ConfigAttempt::ladder(max_version, flags) {
            match driver.create_context(&attempt, shared) {
                Ok(mut inner) => {
                    let default_surface = match inner
                        .create_offscreen_surface(DEFAULT_TARGET_SIZE, DEFAULT_TARGET_SIZE)
                        .and_then(|surface| inner.make_current(surface).map(|_| surface))
                    {
                        Ok(surface) => surface,
                        Err(e) => {
                            inner.release();
                            return Err(e);
                        }
                    };
                    let handle = inner.handle();
                    info!(
                        driver = driver.name(),
                        version = inner.version(),
                        color = ?attempt.color,
                        recordable = attempt.recordable,
                        "Graphics context created"
                    );
                    return Ok(Self {
                        inner: Some(inner),
                        attempt,
                        handle,
                        default_surface,
                    });
                }
                Err(GraphicsError::ConfigRejected(reason)) => {
                    debug!(?attempt, %reason, "Configuration rejected, trying next");
                }
                Err(e) => {
                    warn!(?attempt, error = %e, "Context creation failed, trying next");
                }
            }
        }
        Err(GraphicsError::NoUsableConfig)
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    /// Configuration the driver accepted
    pub fn attempt(&self) -> &ConfigAttempt {
        &self.attempt
    }

    pub fn version(&self) -> u32 {
        self.attempt.version
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Access the native context; fails after [`release`](Self::release)
    pub fn driver(&mut self) -> Result<&mut dyn DriverContext, GraphicsError> {
        match self.inner.as_deref_mut() {
            Some(inner) => Ok(inner),
            None => Err(GraphicsError::ContextReleased),
        }
    }

    /// Make the 1x1 default target current
    pub fn make_default_current(&mut self) -> Result<(), GraphicsError> {
        let surface = self.default_surface;
        self.driver()?.make_current(surface)
    }

    /// Flush and wait for the GPU
    pub fn sync(&mut self) -> Result<(), GraphicsError> {
        let driver = self.driver()?;
        driver.flush();
        driver.sync();
        Ok(())
    }

    /// Destroy the default target and the context; later calls do nothing
    pub fn release(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.make_default();
            inner.destroy_surface(self.default_surface);
            inner.release();
            debug!(handle = ?self.handle, "Graphics context released");
        }
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{AcceptPolicy, SoftwareDriver};

    fn flags(recordable: bool) -> ContextFlags {
        ContextFlags {
            recordable,
            ..ContextFlags::default()
        }
    }

    #[test]
    fn ladder_degrades_version_then_color() {
        let ladder = ConfigAttempt::ladder(3, &flags(true));
        assert_eq!(ladder.len(), 12);
        assert_eq!(ladder[0].version, 3);
        assert!(ladder[0].recordable);
        assert_eq!(ladder[0].color, ColorFormat::Rgba8888);
        assert!(!ladder[1].recordable);
        assert_eq!(ladder[2].version, 2);
        assert_eq!(ladder[5].version, 1);
        assert_eq!(ladder[6].color, ColorFormat::Rgb565);
        assert_eq!(ladder[6].version, 3);
    }

    #[test]
    fn ladder_without_recordable_has_no_duplicates() {
        let ladder = ConfigAttempt::ladder(2, &flags(false));
        assert_eq!(ladder.len(), 4);
        assert!(ladder.iter().all(|a| !a.recordable));
    }

    #[test]
    fn context_falls_back_to_supported_version() {
        let mut driver = SoftwareDriver::with_policy(AcceptPolicy {
            max_version: 2,
            ..AcceptPolicy::default()
        });
        let ctx = GraphicsContext::create(&mut driver, 3, None, &flags(true)).unwrap();
        assert_eq!(ctx.version(), 2);
        assert!(ctx.attempt().recordable);
    }

    #[test]
    fn context_drops_recordable_when_rejected() {
        let mut driver = SoftwareDriver::with_policy(AcceptPolicy {
            reject_recordable: true,
            ..AcceptPolicy::default()
        });
        let ctx = GraphicsContext::create(&mut driver, 3, None, &flags(true)).unwrap();
        assert_eq!(ctx.version(), 3);
        assert!(!ctx.attempt().recordable);
    }

    #[test]
    fn context_falls_back_to_rgb565() {
        let mut driver = SoftwareDriver::with_policy(AcceptPolicy {
            reject_rgba8888: true,
            ..AcceptPolicy::default()
        });
        let ctx = GraphicsContext::create(&mut driver, 3, None, &flags(true)).unwrap();
        assert_eq!(ctx.attempt().color, ColorFormat::Rgb565);
    }

    #[test]
    fn no_config_is_fatal() {
        let mut driver = SoftwareDriver::with_policy(AcceptPolicy {
            reject_all: true,
            ..AcceptPolicy::default()
        });
        let result = GraphicsContext::create(&mut driver, 3, None, &flags(true));
        assert!(matches!(result, Err(GraphicsError::NoUsableConfig)));
    }

    #[test]
    fn release_is_idempotent() {
        let mut driver = SoftwareDriver::new();
        let mut ctx = GraphicsContext::create(&mut driver, 3, None, &flags(true)).unwrap();
        ctx.release();
        ctx.release();
        assert!(ctx.is_released());
        assert!(matches!(ctx.driver(), Err(GraphicsError::ContextReleased)));
        assert!(ctx.make_default_current().is_err());
    }
}
