//! Image normalization shared by every downstream stage.
//!
//! All operations are copy-on-transform: the input is never modified. Empty
//! (zero-width or zero-height) images are rejected with
//! [`ImageError::InvalidImage`] rather than passed through.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::{bilateral_filter, gaussian_blur_f32, median_filter};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sigma matching a 5×5 Gaussian kernel with automatic sigma.
const GAUSSIAN_5X5_SIGMA: f32 = 1.1;
const BILATERAL_DIAMETER: u32 = 9;
const BILATERAL_SIGMA: f32 = 75.0;
const MEDIAN_RADIUS: u32 = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("invalid image: {width}x{height} has no pixels")]
    InvalidImage { width: u32, height: u32 },
}

/// Denoising filter choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenoiseMethod {
    Gaussian,
    Bilateral,
    Median,
}

/// Reject images with a zero dimension.
pub fn ensure_valid<I: GenericImageView>(image: &I) -> Result<(), ImageError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidImage { width, height });
    }
    Ok(())
}

/// Convert to 8-bit grayscale.
pub fn normalize(image: &DynamicImage) -> Result<GrayImage, ImageError> {
    ensure_valid(image)?;
    Ok(image.to_luma8())
}

/// Uniform scale factor (≤ 1.0) that fits `width × height` inside `max_w × max_h`.
pub fn fit_scale(width: u32, height: u32, max_w: u32, max_h: u32) -> f32 {
    if width <= max_w && height <= max_h {
        return 1.0;
    }
    (max_w as f32 / width as f32).min(max_h as f32 / height as f32)
}

/// Downscale to fit within `max_w × max_h`, preserving aspect ratio.
///
/// Returns an unchanged copy when the image already fits.
pub fn resize(image: &DynamicImage, max_w: u32, max_h: u32) -> Result<DynamicImage, ImageError> {
    ensure_valid(image)?;
    let (width, height) = image.dimensions();
    let scale = fit_scale(width, height, max_w, max_h);
    if scale >= 1.0 {
        return Ok(image.clone());
    }
    let new_w = ((width as f32 * scale).round() as u32).max(1);
    let new_h = ((height as f32 * scale).round() as u32).max(1);
    tracing::debug!(width, height, new_w, new_h, "downscaling image");
    Ok(image.resize_exact(new_w, new_h, FilterType::Triangle))
}

/// Upscale a grayscale image so its width reaches `min_width` (cubic resampling).
///
/// Returns `None` when the image is already at least that wide.
pub fn upscale_to_width(gray: &GrayImage, min_width: u32) -> Result<Option<GrayImage>, ImageError> {
    ensure_valid(gray)?;
    let (width, height) = gray.dimensions();
    if width >= min_width {
        return Ok(None);
    }
    let scale = min_width as f32 / width as f32;
    let new_h = ((height as f32 * scale).round() as u32).max(1);
    Ok(Some(image::imageops::resize(
        gray,
        min_width,
        new_h,
        FilterType::CatmullRom,
    )))
}

/// Linear remap `out = clip(alpha * in + beta, 0, 255)`.
pub fn enhance_contrast(gray: &GrayImage, alpha: f32, beta: f32) -> Result<GrayImage, ImageError> {
    ensure_valid(gray)?;
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (alpha * i as f32 + beta).round().clamp(0.0, 255.0) as u8;
    }
    let mut out = gray.clone();
    for p in out.pixels_mut() {
        p.0[0] = lut[p.0[0] as usize];
    }
    Ok(out)
}

/// Remove noise with the selected filter.
pub fn denoise(gray: &GrayImage, method: DenoiseMethod) -> Result<GrayImage, ImageError> {
    ensure_valid(gray)?;
    Ok(match method {
        DenoiseMethod::Gaussian => gaussian_blur_f32(gray, GAUSSIAN_5X5_SIGMA),
        DenoiseMethod::Bilateral => {
            bilateral_filter(gray, BILATERAL_DIAMETER, BILATERAL_SIGMA, BILATERAL_SIGMA)
        }
        DenoiseMethod::Median => median_filter(gray, MEDIAN_RADIUS, MEDIAN_RADIUS),
    })
}

/// Binary threshold at the Otsu level: pixels above it become 255, the rest 0.
pub fn otsu_binarize(gray: &GrayImage) -> Result<GrayImage, ImageError> {
    ensure_valid(gray)?;
    Ok(threshold(gray, otsu_level(gray), ThresholdType::Binary))
}
