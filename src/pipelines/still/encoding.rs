// SPDX-License-Identifier: GPL-3.0-only

//! Still image encoding
//!
//! Turns an RGBA readback into one of the supported formats:
//! - JPEG (lossy, quality controlled, alpha dropped)
//! - PNG (lossless)
//! - WebP (lossless; quality is ignored)

use crate::errors::CaptureError;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Supported still capture formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StillFormat {
    /// JPEG format (lossy compression)
    #[default]
    Jpeg,
    /// PNG format (lossless compression)
    Png,
    /// WebP format (lossless, keeps alpha)
    WebP,
}

impl StillFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            StillFormat::Jpeg => "jpg",
            StillFormat::Png => "png",
            StillFormat::WebP => "webp",
        }
    }

    pub fn is_lossless(&self) -> bool {
        !matches!(self, StillFormat::Jpeg)
    }

    /// Pick the format from a file extension, case-insensitive
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" => Ok(StillFormat::Jpeg),
            "png" => Ok(StillFormat::Png),
            "webp" => Ok(StillFormat::WebP),
            _ => Err(CaptureError::UnknownFormat(path.display().to_string())),
        }
    }
}

/// Encode tightly packed RGBA8 pixels into `out`
pub fn encode_rgba(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: StillFormat,
    quality: u8,
    out: &mut dyn Write,
) -> Result<(), CaptureError> {
    if width == 0 || height == 0 || pixels.len() != width as usize * height as usize * 4 {
        return Err(CaptureError::InvalidDimensions);
    }

    match format {
        StillFormat::Jpeg => {
            let rgba = RgbaImage::from_raw(width, height, pixels.to_vec())
                .ok_or(CaptureError::InvalidDimensions)?;
            let rgb = image::DynamicImage::ImageRgba8(rgba).to_rgb8();
            JpegEncoder::new_with_quality(&mut *out, quality).encode(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        StillFormat::Png => {
            PngEncoder::new(&mut *out).write_image(
                pixels,
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
        StillFormat::WebP => {
            WebPEncoder::new_lossless(&mut *out).encode(
                pixels,
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
        }
    }
    out.flush()?;

    debug!(width, height, ?format, quality, "Still encoded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        (0..width * height)
            .flat_map(|i| [(i % 256) as u8, (i / 3 % 256) as u8, 128, 255])
            .collect()
    }

    #[test]
    fn test_format_extension() {
        assert_eq!(StillFormat::Jpeg.extension(), "jpg");
        assert_eq!(StillFormat::Png.extension(), "png");
        assert_eq!(StillFormat::WebP.extension(), "webp");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(StillFormat::from_path("a/b.JPEG").unwrap(), StillFormat::Jpeg);
        assert_eq!(StillFormat::from_path("shot.jpg").unwrap(), StillFormat::Jpeg);
        assert_eq!(StillFormat::from_path("shot.Png").unwrap(), StillFormat::Png);
        assert_eq!(StillFormat::from_path("shot.webp").unwrap(), StillFormat::WebP);
        assert!(matches!(
            StillFormat::from_path("shot.bmp"),
            Err(CaptureError::UnknownFormat(_))
        ));
        assert!(StillFormat::from_path("no_extension").is_err());
    }

    #[test]
    fn test_jpeg_output_decodes() {
        let mut out = Vec::new();
        encode_rgba(&gradient(16, 8), 16, 8, StillFormat::Jpeg, 80, &mut out).unwrap();
        assert_eq!(&out[0..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn test_png_is_lossless() {
        let pixels = gradient(5, 3);
        let mut out = Vec::new();
        encode_rgba(&pixels, 5, 3, StillFormat::Png, 0, &mut out).unwrap();
        let decoded = image::load_from_memory(&out).unwrap().to_rgba8();
        assert_eq!(decoded.as_raw(), &pixels);
    }

    #[test]
    fn test_webp_signature() {
        let mut out = Vec::new();
        encode_rgba(&gradient(4, 4), 4, 4, StillFormat::WebP, 50, &mut out).unwrap();
        assert_eq!(&out[0..4], b"RIFF");
        assert_eq!(&out[8..12], b"WEBP");
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut out = Vec::new();
        let result = encode_rgba(&[0u8; 10], 2, 2, StillFormat::Png, 0, &mut out);
        assert!(matches!(result, Err(CaptureError::InvalidDimensions)));
        assert!(out.is_empty());
    }
}
