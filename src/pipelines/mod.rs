// SPDX-License-Identifier: GPL-3.0-only

//! Output pipelines fed by the render worker
//!
//! - [`still`]: single-frame capture encoded to JPEG, PNG or WebP

pub mod still;
