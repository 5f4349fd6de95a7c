//! cardscan-core: student ID card reading and face matching.
//!
//! Finds and rectifies the card in a photo, transcribes it with a battery of
//! OCR attempts, parses the identity fields, crops the portrait, and embeds
//! the face (SCRFD + ArcFace via ONNX Runtime) for corpus search.

pub mod alignment;
pub mod config;
pub mod detector;
pub mod face;
pub mod fields;
pub mod localize;
pub mod matcher;
pub mod normalize;
pub mod ocr;
pub mod pipeline;
pub mod portrait;
pub mod recognizer;
pub mod tesseract;
pub mod types;

use std::path::PathBuf;

pub use config::ExtractionConfig;
pub use face::{DetectionMode, FaceBackend, OnnxFaceBackend};
pub use matcher::{EuclideanMatcher, MatchPolicy, Matcher};
pub use ocr::{SegmentationMode, TextBackend};
pub use pipeline::{CardReader, ExtractError};
pub use tesseract::TesseractCli;
pub use types::{
    AcademicTerm, BoundingBox, CardFields, CorpusEntry, Embedding, MatchResult, Portrait,
    StudentRecord,
};

/// SCRFD detection model file name.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const RECOGNIZER_MODEL: &str = "w600k_r50.onnx";

/// `$XDG_DATA_HOME/cardscan/models`, falling back to `~/.local/share/cardscan/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("cardscan")
        .join("models")
}
