//! Frame Optimizer (spec §4.3): downscales and re-encodes a raw captured
//! image to JPEG at a fixed quality, returning both the encoded bytes and
//! the pre-scale dimensions so the parent can lay out at native aspect.
//!
//! The `image-codec` feature (default on) is the boot-time capability flag
//! spec Design Note 1 calls for in place of the original's runtime
//! `import PIL` probe. With it disabled, `optimize` degrades to a
//! pass-through plus a best-effort PNG header peek.

use thiserror::Error;

/// Target long-side bound for downscaling (spec §4.3).
pub const MAX_LONG_SIDE: u32 = 960;
/// Fixed re-encode quality (spec §4.3).
pub const JPEG_QUALITY: u8 = 50;

/// Result of optimizing one raw captured frame.
#[derive(Debug, Clone)]
pub struct OptimizedFrame {
    /// Payload bytes: JPEG when the `image-codec` feature is active,
    /// otherwise the original raw bytes.
    pub payload: Vec<u8>,
    /// Pre-downscale width, or 0 if unknown.
    pub orig_width: u32,
    /// Pre-downscale height, or 0 if unknown.
    pub orig_height: u32,
}

/// Errors from the optimizer's decode/encode path.
#[derive(Debug, Error)]
pub enum OptimizeError {
    /// The `image` crate could not decode the raw bytes.
    #[error("failed to decode raw image: {0}")]
    Decode(String),
    /// The `image` crate could not re-encode the downscaled image.
    #[error("failed to encode jpeg: {0}")]
    Encode(String),
}

const PNG_SIGNATURE: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];

/// Best-effort PNG width/height peek used when no image codec is linked.
///
/// Mirrors the original's `struct.unpack(">I", raw[16:20])` / `[20:24]`.
fn peek_png_dimensions(raw: &[u8]) -> (u32, u32) {
    if raw.len() >= 24 && raw[0..4] == PNG_SIGNATURE {
        let w = u32::from_be_bytes(raw[16..20].try_into().unwrap());
        let h = u32::from_be_bytes(raw[20..24].try_into().unwrap());
        (w, h)
    } else {
        (0, 0)
    }
}

#[cfg(not(feature = "image-codec"))]
pub fn optimize(raw: &[u8]) -> Result<OptimizedFrame, OptimizeError> {
    let (w, h) = peek_png_dimensions(raw);
    Ok(OptimizedFrame {
        payload: raw.to_vec(),
        orig_width: w,
        orig_height: h,
    })
}

#[cfg(feature = "image-codec")]
pub fn optimize(raw: &[u8]) -> Result<OptimizedFrame, OptimizeError> {
    use image::imageops::FilterType;
    use image::{DynamicImage, ImageFormat};

    let decoded =
        image::load_from_memory(raw).map_err(|e| OptimizeError::Decode(e.to_string()))?;
    let orig_width = decoded.width();
    let orig_height = decoded.height();

    let long_side = orig_width.max(orig_height);
    let resized: DynamicImage = if long_side > MAX_LONG_SIDE {
        let scale = f64::from(MAX_LONG_SIDE) / f64::from(long_side);
        let new_w = ((f64::from(orig_width) * scale) as u32).max(1);
        let new_h = ((f64::from(orig_height) * scale) as u32).max(1);
        decoded.resize_exact(new_w, new_h, FilterType::Nearest)
    } else {
        decoded
    };

    let rgb = resized.to_rgb8();
    let mut payload = Vec::new();
    {
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut payload, JPEG_QUALITY);
        encoder
            .encode_image(&DynamicImage::ImageRgb8(rgb))
            .map_err(|e| OptimizeError::Encode(e.to_string()))?;
    }
    let _ = ImageFormat::Jpeg; // keep the format import meaningful for future multi-format support

    Ok(OptimizedFrame {
        payload,
        orig_width,
        orig_height,
    })
}


#[cfg(all(test, not(feature = "image-codec")))]
mod no_codec_tests {
    use super::*;

    #[test]
    fn passes_through_and_peeks_png_header() {
        let mut raw = PNG_SIGNATURE.to_vec();
        raw.extend_from_slice(&[0u8; 4]); // IHDR length/type placeholder padding
        raw.extend_from_slice(&640u32.to_be_bytes());
        raw.extend_from_slice(&480u32.to_be_bytes());

        let optimized = optimize(&raw).unwrap();
        assert_eq!(optimized.payload, raw);
        assert_eq!(optimized.orig_width, 640);
        assert_eq!(optimized.orig_height, 480);
    }

    #[test]
    fn reports_zero_dimensions_for_non_png_input() {
        let optimized = optimize(b"not a png at all").unwrap();
        assert_eq!(optimized.orig_width, 0);
        assert_eq!(optimized.orig_height, 0);
    }
}
