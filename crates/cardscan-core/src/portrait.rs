//! Face region extraction.
//!
//! Finds the dominant face on a card and crops a head-and-neck portrait.
//! Padding is asymmetric and relative to the face size: more room above for
//! hair, some below for the neck, a little at the sides.

use image::imageops::FilterType;
use image::RgbImage;

use crate::config::PortraitConfig;
use crate::face::{self, FaceBackend};
use crate::types::{BoundingBox, CropRect, Portrait};

/// Portrait cropper over a [`FaceBackend`].
#[derive(Debug, Clone)]
pub struct PortraitExtractor {
    config: PortraitConfig,
}

impl PortraitExtractor {
    pub fn new(config: PortraitConfig) -> Self {
        Self { config }
    }

    /// Crop the largest face of `image`, or `None` when no face is found or
    /// the padded window falls outside the image.
    pub fn extract(&self, backend: &mut dyn FaceBackend, image: &RgbImage) -> Option<Portrait> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return None;
        }

        let longest = width.max(height);
        let (scale, upscaled) = if longest < self.config.min_edge {
            let scale = self.config.min_edge as f32 / longest as f32;
            let up_w = ((width as f32 * scale).round() as u32).max(1);
            let up_h = ((height as f32 * scale).round() as u32).max(1);
            tracing::debug!(width, height, up_w, up_h, "upscaling for face detection");
            (
                scale,
                Some(image::imageops::resize(image, up_w, up_h, FilterType::CatmullRom)),
            )
        } else {
            (1.0, None)
        };
        let detect_on = upscaled.as_ref().unwrap_or(image);

        let faces = face::detect_with_fallback(backend, detect_on);
        let face = face::largest_face(&faces)?;

        let Some(crop) = padded_crop(face, self.config.base_padding, scale, width, height) else {
            tracing::debug!(?face, "portrait crop is empty after clamping");
            return None;
        };
        tracing::debug!(?crop, confidence = face.confidence, "portrait cropped");

        Some(Portrait {
            image: image::imageops::crop_imm(image, crop.x, crop.y, crop.width, crop.height)
                .to_image(),
            face: face.unscaled(scale),
            crop,
        })
    }
}

/// Pad `face` (in detection coordinates), map it back through `scale`, and
/// clamp it to a `width × height` image.
///
/// Padding: top `max(0.8h, 2b)`, bottom `max(0.6h, 2b)`, sides `max(0.3w, b)`.
pub fn padded_crop(
    face: &BoundingBox,
    base_padding: u32,
    scale: f32,
    width: u32,
    height: u32,
) -> Option<CropRect> {
    let base = base_padding as f32;
    let top = (0.8 * face.height).max(2.0 * base);
    let bottom = (0.6 * face.height).max(2.0 * base);
    let side = (0.3 * face.width).max(base);

    let scale = if scale > 0.0 { scale } else { 1.0 };
    let x1 = ((face.x - side) / scale).floor().max(0.0);
    let y1 = ((face.y - top) / scale).floor().max(0.0);
    let x2 = ((face.x + face.width + side) / scale).ceil().min(width as f32);
    let y2 = ((face.y + face.height + bottom) / scale).ceil().min(height as f32);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(CropRect {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    })
}
