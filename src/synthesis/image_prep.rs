//! Upload normalisation: decode, validate, downsize and re-encode images
//! before they are stored in a layer or sent to the image service.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use tracing::info;

use crate::error::TryOnError;
use crate::outfit::ImageRef;

/// Default cap on the longest edge of an uploaded image.
pub const MAX_UPLOAD_DIMENSION: u32 = 1024;

/// Shortest side below which an upload is rejected.
pub const MIN_UPLOAD_DIMENSION: u32 = 64;

/// Prepare an uploaded model photo or garment image.
///
/// # Arguments
/// * `image_bytes` - Raw image bytes (JPEG, PNG, WebP, ...)
/// * `max_dimension` - Longest edge allowed after resizing
///
/// # Returns
/// A PNG data URL. PNG keeps garment cut-out transparency intact.
///
/// # Errors
/// - Image cannot be decoded
/// - Image too small (< 64px on shortest side)
pub fn prepare_upload(image_bytes: &[u8], max_dimension: u32) -> Result<ImageRef, TryOnError> {
    let img = image::load_from_memory(image_bytes).map_err(|e| {
        TryOnError::Image(format!(
            "Failed to load image: {}. Ensure it's a valid JPEG/PNG/WebP.",
            e
        ))
    })?;

    let (width, height) = (img.width(), img.height());
    info!("Loaded upload: {}x{}", width, height);

    if width.min(height) < MIN_UPLOAD_DIMENSION {
        return Err(TryOnError::Image(format!(
            "Image too small: {}x{}. Minimum dimension is {}px.",
            width, height, MIN_UPLOAD_DIMENSION
        )));
    }

    let resized = resize_if_needed(img, max_dimension);
    let png = encode_to_png(&resized)?;
    info!(
        "Prepared upload: {}x{}, {} bytes",
        resized.width(),
        resized.height(),
        png.len()
    );

    Ok(ImageRef::from_bytes("image/png", &png))
}

/// Resize so neither side exceeds `max_dimension`, keeping aspect ratio.
fn resize_if_needed(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= max_dimension && height <= max_dimension {
        return img;
    }

    let scale = max_dimension as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * scale) as u32).max(1);
    let new_height = ((height as f32 * scale) as u32).max(1);

    img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

fn encode_to_png(img: &DynamicImage) -> Result<Vec<u8>, TryOnError> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| TryOnError::Image(format!("Failed to encode image to PNG: {}", e)))?;
    Ok(buffer.into_inner())
}
