// SPDX-License-Identifier: GPL-3.0-only

//! Still capture pipeline
//!
//! ```text
//! caller ── submit ──▶ CaptureSlot ◀── begin/finish ── render worker
//!                                                        │
//!                               readback ─▶ encode_rgba ─▶ sink
//! ```

pub mod encoding;
pub(crate) mod request;

pub use encoding::{StillFormat, encode_rgba};
pub use request::CaptureSink;

use std::path::{Path, PathBuf};

/// Default folder name for captured stills
pub const DEFAULT_SAVE_FOLDER: &str = "frame-fanout";

/// Get default still directory
pub fn default_still_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

/// Timestamped file name inside `dir`
pub fn timestamped_path(dir: &Path, format: StillFormat) -> PathBuf {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    dir.join(format!("IMG_{}.{}", timestamp, format.extension()))
}
