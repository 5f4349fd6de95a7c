//! Face model boundary.
//!
//! [`FaceBackend`] is the seam between the card pipeline and whatever
//! produces face boxes and embeddings. [`OnnxFaceBackend`] is the production
//! implementation over SCRFD and ArcFace.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detector::{self, DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("face backend: {0}")]
    Backend(String),
}

/// Detection effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// One pass at the default confidence threshold.
    Fast,
    /// Lower threshold plus an upscaled second pass.
    Accurate,
}

pub trait FaceBackend: Send {
    /// Face boxes in `image` coordinates.
    fn detect(
        &mut self,
        image: &RgbImage,
        mode: DetectionMode,
    ) -> Result<Vec<BoundingBox>, FaceError>;

    /// Embedding of one face previously returned by [`detect`](Self::detect).
    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, FaceError>;
}

/// Largest box by area; the earliest wins ties.
pub fn largest_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces.iter().fold(None, |best: Option<&BoundingBox>, face| match best {
        Some(b) if b.area() >= face.area() => Some(b),
        _ => Some(face),
    })
}

/// Fast detection first, accurate detection when nothing is found.
///
/// Backend errors are logged and treated as "no face".
pub fn detect_with_fallback(backend: &mut dyn FaceBackend, image: &RgbImage) -> Vec<BoundingBox> {
    for mode in [DetectionMode::Fast, DetectionMode::Accurate] {
        match backend.detect(image, mode) {
            Ok(faces) if !faces.is_empty() => {
                tracing::debug!(?mode, faces = faces.len(), "faces detected");
                return faces;
            }
            Ok(_) => tracing::debug!(?mode, "no face detected"),
            Err(e) => tracing::warn!(?mode, error = %e, "face detection failed"),
        }
    }
    Vec::new()
}

/// SCRFD detection plus ArcFace embedding.
pub struct OnnxFaceBackend {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceBackend {
    pub fn load(detector_model: &Path, recognizer_model: &Path) -> Result<Self, FaceError> {
        Ok(Self {
            detector: FaceDetector::load(detector_model)?,
            recognizer: FaceRecognizer::load(recognizer_model)?,
        })
    }
}

impl FaceBackend for OnnxFaceBackend {
    fn detect(
        &mut self,
        image: &RgbImage,
        mode: DetectionMode,
    ) -> Result<Vec<BoundingBox>, FaceError> {
        match mode {
            DetectionMode::Fast => Ok(self.detector.detect(image, detector::FAST_THRESHOLD)?),
            DetectionMode::Accurate => {
                let mut faces = self.detector.detect(image, detector::ACCURATE_THRESHOLD)?;
                let upscaled = image::imageops::resize(
                    image,
                    image.width() * 2,
                    image.height() * 2,
                    FilterType::CatmullRom,
                );
                faces.extend(
                    self.detector
                        .detect(&upscaled, detector::ACCURATE_THRESHOLD)?
                        .iter()
                        .map(|f| f.unscaled(2.0)),
                );
                Ok(detector::merge_passes(faces))
            }
        }
    }

    fn embed(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, FaceError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y: 0.0,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: None,
        }
    }

    struct ModeBackend {
        calls: Vec<DetectionMode>,
        fast: Vec<BoundingBox>,
        accurate: Result<Vec<BoundingBox>, String>,
    }

    impl FaceBackend for ModeBackend {
        fn detect(
            &mut self,
            _image: &RgbImage,
            mode: DetectionMode,
        ) -> Result<Vec<BoundingBox>, FaceError> {
            self.calls.push(mode);
            match mode {
                DetectionMode::Fast => Ok(self.fast.clone()),
                DetectionMode::Accurate => self.accurate.clone().map_err(FaceError::Backend),
            }
        }

        fn embed(&mut self, _image: &RgbImage, _face: &BoundingBox) -> Result<Embedding, FaceError> {
            Err(FaceError::Backend("unused".into()))
        }
    }

    #[test]
    fn test_largest_face_prefers_area_then_order() {
        let faces = vec![face(0.0, 10.0, 10.0), face(1.0, 20.0, 5.0), face(2.0, 5.0, 20.0)];
        // Three equal areas: the first one wins.
        assert_eq!(largest_face(&faces).unwrap().x, 0.0);

        let faces = vec![face(0.0, 10.0, 10.0), face(1.0, 11.0, 10.0)];
        assert_eq!(largest_face(&faces).unwrap().x, 1.0);
        assert!(largest_face(&[]).is_none());
    }

    #[test]
    fn test_fallback_only_when_fast_finds_nothing() {
        let mut backend = ModeBackend {
            calls: vec![],
            fast: vec![face(0.0, 10.0, 10.0)],
            accurate: Ok(vec![]),
        };
        let image = RgbImage::new(10, 10);
        assert_eq!(detect_with_fallback(&mut backend, &image).len(), 1);
        assert_eq!(backend.calls, vec![DetectionMode::Fast]);

        let mut backend = ModeBackend {
            calls: vec![],
            fast: vec![],
            accurate: Ok(vec![face(3.0, 8.0, 8.0)]),
        };
        let found = detect_with_fallback(&mut backend, &image);
        assert_eq!(found[0].x, 3.0);
        assert_eq!(backend.calls, vec![DetectionMode::Fast, DetectionMode::Accurate]);
    }

    #[test]
    fn test_fallback_swallows_errors() {
        let mut backend = ModeBackend {
            calls: vec![],
            fast: vec![],
            accurate: Err("model crashed".into()),
        };
        assert!(detect_with_fallback(&mut backend, &RgbImage::new(4, 4)).is_empty());
    }
}
