//! Image decode and resize.

use image::imageops::FilterType;

use super::PixelBuffer;
use crate::error::{HearthError, Result};

/// Size an image of `width x height` should be scaled to so that it is at
/// most `max_width` wide, preserving aspect ratio. Images already narrow
/// enough keep their size.
pub fn resize_target(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled = (u64::from(height) * u64::from(max_width) + u64::from(width) / 2) / u64::from(width);
    let scaled = u32::try_from(scaled).unwrap_or(u32::MAX).max(1);
    (max_width, scaled)
}

/// Decode `bytes` and render them into an RGBA pixel buffer no wider than
/// `max_width`.
///
/// Blocking; call from `spawn_blocking`.
pub fn decode_to_pixels(bytes: &[u8], max_width: u32) -> Result<PixelBuffer> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| HearthError::ImageDecode(format!("cannot decode image: {e}")))?;

    let (width, height) = resize_target(decoded.width(), decoded.height(), max_width);
    let rgba = if (width, height) == (decoded.width(), decoded.height()) {
        decoded.to_rgba8()
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle).to_rgba8()
    };
    // The full-size decode can be many times the size of the output.
    drop(decoded);

    Ok(PixelBuffer {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
    })
}
