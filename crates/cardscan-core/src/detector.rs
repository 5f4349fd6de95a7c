//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the SCRFD 10G model over a letterboxed RGB card image with 3-stride
//! anchor-free decoding and NMS post-processing.

use crate::types::BoundingBox;
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Confidence threshold of a single fast pass.
pub const FAST_THRESHOLD: f32 = 0.5;
/// Lowered threshold used by the accurate multi-scale pass.
pub const ACCURATE_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} (download det_10g.onnx from insightface)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy)]
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl LetterboxInfo {
    fn to_source(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score_idx, bbox_idx, kps_idx).
type StrideOutputIndices = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output indices for strides [8, 16, 32].
    stride_indices: [StrideOutputIndices; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires 9 outputs (3 strides x score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_indices = discover_output_indices(&output_names);
        tracing::debug!(?stride_indices, "SCRFD output tensor mapping");

        Ok(Self {
            session,
            stride_indices,
        })
    }

    /// Detect faces above `threshold`, sorted by descending confidence.
    pub fn detect(
        &mut self,
        image: &RgbImage,
        threshold: f32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }
        let (input, letterbox) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all_detections = Vec::new();
        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.stride_indices[stride_pos];

            let (_, scores) = outputs[score_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("scores stride {stride}: {e}"))
            })?;
            let (_, bboxes) = outputs[bbox_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}"))
            })?;
            let (_, kps) = outputs[kps_idx].try_extract_tensor::<f32>().map_err(|e| {
                DetectorError::InferenceFailed(format!("kps stride {stride}: {e}"))
            })?;

            all_detections.extend(decode_stride(
                StrideOutputs { scores, bboxes, kps },
                stride,
                &letterbox,
                threshold,
            ));
        }

        let result = nms(all_detections, SCRFD_NMS_THRESHOLD);
        tracing::debug!(faces = result.len(), threshold, "SCRFD pass complete");
        Ok(result)
    }
}

/// Letterbox an RGB image into the 640×640 NCHW input tensor.
///
/// Padding is filled with the mean so it normalizes to 0.0.
fn preprocess(image: &RgbImage) -> (Array4<f32>, LetterboxInfo) {
    let (width, height) = image.dimensions();
    let size = SCRFD_INPUT_SIZE as f32;
    let scale = (size / width as f32).min(size / height as f32);

    let new_w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE as u32);
    let pad_x = (SCRFD_INPUT_SIZE as u32 - new_w) / 2;
    let pad_y = (SCRFD_INPUT_SIZE as u32 - new_h) / 2;

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + pad_x) as usize, (y + pad_y) as usize);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
    };
    (tensor, letterbox)
}

/// Map named SCRFD outputs (`score_8`, `bbox_16`, `kps_32`, ...) to stride slots.
///
/// Exports with generic numeric names fall back to the standard positional
/// layout: scores at 0-2, bboxes at 3-5, keypoints at 6-8.
fn discover_output_indices(names: &[String]) -> [StrideOutputIndices; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputIndices>> = SCRFD_STRIDES
        .iter()
        .map(|&stride| Some((find("score", stride)?, find("bbox", stride)?, find("kps", stride)?)))
        .collect();

    match named.as_deref() {
        Some(&[s8, s16, s32]) => [s8, s16, s32],
        _ => {
            tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

/// Raw tensors for one stride level.
struct StrideOutputs<'a> {
    scores: &'a [f32],
    bboxes: &'a [f32],
    kps: &'a [f32],
}

fn decode_stride(
    outputs: StrideOutputs<'_>,
    stride: usize,
    letterbox: &LetterboxInfo,
    threshold: f32,
) -> Vec<BoundingBox> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let num_anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = outputs.scores.get(idx).copied().unwrap_or(0.0);
        if score <= threshold {
            continue;
        }
        let Some(offsets) = outputs.bboxes.get(idx * 4..idx * 4 + 4) else {
            continue;
        };

        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let anchor_x = (cell % grid) as f32 * step;
        let anchor_y = (cell / grid) as f32 * step;

        let (x1, y1) =
            letterbox.to_source(anchor_x - offsets[0] * step, anchor_y - offsets[1] * step);
        let (x2, y2) =
            letterbox.to_source(anchor_x + offsets[2] * step, anchor_y + offsets[3] * step);

        let landmarks = outputs.kps.get(idx * 10..idx * 10 + 10).map(|kps| {
            std::array::from_fn(|i| {
                letterbox.to_source(anchor_x + kps[i * 2] * step, anchor_y + kps[i * 2 + 1] * step)
            })
        });

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }
    detections
}

/// Non-Maximum Suppression; the result is sorted by descending confidence.
pub(crate) fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|kept| iou(kept, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Merge detections from several passes with the detector's NMS threshold.
pub(crate) fn merge_passes(detections: Vec<BoundingBox>) -> Vec<BoundingBox> {
    nms(detections, SCRFD_NMS_THRESHOLD)
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn test_iou() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);

        let far = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &far).abs() < 1e-6);

        // Overlap 5x10 = 50, union 100 + 100 - 50 = 150
        let half = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &half) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn test_preprocess_letterbox() {
        let image = RgbImage::from_pixel(320, 240, Rgb([255, 0, 128]));
        let (tensor, letterbox) = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert!((letterbox.scale - 2.0).abs() < 1e-6);
        assert_eq!((letterbox.pad_x, letterbox.pad_y), (0.0, 80.0));

        // Padding rows normalize to zero, image rows keep RGB order.
        assert_eq!(tensor[[0, 0, 10, 320]], 0.0);
        let red = tensor[[0, 0, 320, 320]];
        let blue = tensor[[0, 2, 320, 320]];
        assert!((red - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2, "red = {red}");
        assert!((blue - (128.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-2, "blue = {blue}");

        let (x, y) = letterbox.to_source(200.0, 280.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_stride_maps_anchor() {
        let grid = SCRFD_INPUT_SIZE / 32;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        let mut bboxes = vec![0.0f32; anchors * 4];
        let kps = vec![0.5f32; anchors * 10];

        // Cell (x=2, y=1), second anchor of the cell.
        let idx = (grid + 2) * SCRFD_ANCHORS_PER_CELL + 1;
        scores[idx] = 0.9;
        scores[0] = 0.2;
        bboxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 2.0, 3.0]);

        let letterbox = LetterboxInfo {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let outputs = StrideOutputs {
            scores: &scores,
            bboxes: &bboxes,
            kps: &kps,
        };
        let dets = decode_stride(outputs, 32, &letterbox, FAST_THRESHOLD);

        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        // Anchor at (64, 32); box (32, 0)-(128, 128) in input space.
        assert_eq!((det.x, det.y, det.width, det.height), (16.0, 0.0, 48.0, 64.0));
        assert_eq!(det.landmarks.unwrap()[0], (40.0, 24.0));
    }

    #[test]
    fn test_discover_output_indices() {
        let to_names = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let ordered = to_names(&[
            "score_8", "score_16", "score_32", "bbox_8", "bbox_16", "bbox_32", "kps_8", "kps_16",
            "kps_32",
        ]);
        assert_eq!(discover_output_indices(&ordered), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);

        let shuffled = to_names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32",
            "score_32",
        ]);
        assert_eq!(discover_output_indices(&shuffled), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numeric: Vec<String> = (0..9).map(|i: usize| (i + 400).to_string()).collect();
        assert_eq!(discover_output_indices(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }
}
