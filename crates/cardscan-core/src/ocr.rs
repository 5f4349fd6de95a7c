//! Multi-hypothesis text acquisition.
//!
//! The card is transcribed under a fixed battery of preprocessing variants
//! and page-segmentation modes. Each transcription is scored by a cheap
//! heuristic and the best one wins. Backend failures on individual attempts
//! are logged and skipped.

use std::fmt;
use std::sync::OnceLock;

use image::{DynamicImage, GrayImage};
use imageproc::filter::bilateral_filter;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OcrConfig;
use crate::fields::VI_UPPER;
use crate::normalize::{self, ImageError};

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("OCR engine failed: {0}")]
    Engine(String),
    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("no text could be read from the image")]
    TextUnavailable,
    #[error(transparent)]
    InvalidImage(#[from] ImageError),
}

/// Page-segmentation strategy requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    UniformBlock,
    SingleColumn,
    Auto,
    SparseText,
}

impl SegmentationMode {
    /// Battery order: uniform block first, it suits card layouts best.
    pub const ALL: [SegmentationMode; 4] = [
        SegmentationMode::UniformBlock,
        SegmentationMode::SingleColumn,
        SegmentationMode::Auto,
        SegmentationMode::SparseText,
    ];

    /// Tesseract `--psm` number.
    pub fn psm(self) -> u8 {
        match self {
            SegmentationMode::UniformBlock => 6,
            SegmentationMode::SingleColumn => 4,
            SegmentationMode::Auto => 3,
            SegmentationMode::SparseText => 11,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            SegmentationMode::UniformBlock => "block",
            SegmentationMode::SingleColumn => "column",
            SegmentationMode::Auto => "auto",
            SegmentationMode::SparseText => "sparse",
        }
    }
}

impl fmt::Display for SegmentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Preprocessing applied before a transcription attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    Unmodified,
    Upscaled,
    Contrast,
    Denoised,
    Otsu,
}

impl Variant {
    pub fn tag(self) -> &'static str {
        match self {
            Variant::Unmodified => "original_gray",
            Variant::Upscaled => "large_gray",
            Variant::Contrast => "enhanced_gray",
            Variant::Denoised => "denoised",
            Variant::Otsu => "otsu",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Text recognition backend.
///
/// Implementations must be shareable across threads; the engine may call
/// `recognize` concurrently for different variants.
pub trait TextBackend: Send + Sync {
    fn recognize(
        &self,
        image: &GrayImage,
        language: &str,
        mode: SegmentationMode,
    ) -> Result<String, OcrError>;
}

/// One transcription attempt and its quality score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OcrCandidate {
    pub text: String,
    pub variant: Variant,
    pub mode: SegmentationMode,
    pub score: u32,
}

fn digit_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("static digit regex must compile"))
}

fn word_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("[A-Z{VI_UPPER}]{{2,}}")).expect("static word regex must compile")
    })
}

fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || c.is_whitespace()
        || matches!(c, '.' | ',' | ':' | ';' | '/' | '-')
        || VI_UPPER.contains(c)
}

/// Quality heuristic for a transcription.
///
/// One point per permitted character, five per digit run, ten per token of
/// two or more uppercase letters, plus `unmodified_bonus` for the
/// unmodified variant.
pub fn score_text(text: &str, variant: Variant, unmodified_bonus: u32) -> u32 {
    let valid = text.chars().filter(|&c| is_valid_char(c)).count() as u32;
    let digit_runs = digit_run_re().find_iter(text).count() as u32;
    let words = word_token_re().find_iter(text).count() as u32;
    let bonus = if variant == Variant::Unmodified {
        unmodified_bonus
    } else {
        0
    };
    valid + digit_runs * 5 + words * 10 + bonus
}

pub struct TextEngine {
    backend: Box<dyn TextBackend>,
    config: OcrConfig,
}

impl TextEngine {
    pub fn new(backend: Box<dyn TextBackend>, config: OcrConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Build the preprocessing battery for a grayscale image.
    pub fn variants(&self, gray: &GrayImage) -> Result<Vec<(Variant, GrayImage)>, ImageError> {
        let mut variants = vec![(Variant::Unmodified, gray.clone())];
        if let Some(large) = normalize::upscale_to_width(gray, self.config.upscale_width)? {
            variants.push((Variant::Upscaled, large));
        }
        variants.push((
            Variant::Contrast,
            normalize::enhance_contrast(gray, self.config.contrast_alpha, 0.0)?,
        ));
        variants.push((
            Variant::Denoised,
            bilateral_filter(
                gray,
                self.config.bilateral_diameter,
                self.config.bilateral_sigma,
                self.config.bilateral_sigma,
            ),
        ));
        variants.push((Variant::Otsu, normalize::otsu_binarize(gray)?));
        Ok(variants)
    }

    /// Transcribe one variant under every configured segmentation mode.
    fn transcribe(&self, variant: Variant, image: &GrayImage) -> Vec<OcrCandidate> {
        let mut out = Vec::new();
        for &mode in &self.config.modes {
            match self.backend.recognize(image, &self.config.language, mode) {
                Ok(text) if !text.trim().is_empty() => {
                    let score = score_text(&text, variant, self.config.unmodified_bonus);
                    tracing::debug!(%variant, %mode, score, "OCR candidate");
                    out.push(OcrCandidate {
                        text,
                        variant,
                        mode,
                        score,
                    });
                }
                Ok(_) => tracing::debug!(%variant, %mode, "empty transcription"),
                Err(e) => tracing::warn!(%variant, %mode, error = %e, "OCR attempt failed"),
            }
        }
        out
    }

    /// Run the whole battery, in battery order.
    pub fn candidates(&self, variants: &[(Variant, GrayImage)]) -> Vec<OcrCandidate> {
        if !self.config.parallel {
            return variants
                .iter()
                .flat_map(|(variant, image)| self.transcribe(*variant, image))
                .collect();
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = variants
                .iter()
                .map(|(variant, image)| scope.spawn(move || self.transcribe(*variant, image)))
                .collect();
            let mut out = Vec::new();
            for handle in handles {
                match handle.join() {
                    Ok(batch) => out.extend(batch),
                    Err(_) => tracing::error!("OCR worker thread panicked"),
                }
            }
            out
        })
    }

    /// Transcribe a card image and return the best-scoring candidate.
    ///
    /// Falls back to a single uniform-block pass over the unmodified
    /// grayscale image when the battery produces nothing.
    pub fn acquire(&self, image: &DynamicImage) -> Result<OcrCandidate, OcrError> {
        let gray = normalize::normalize(image)?;
        let variants = self.variants(&gray)?;
        let candidates = self.candidates(&variants);
        let attempted = candidates.len();

        if let Some(best) = select_best(candidates) {
            tracing::info!(
                variant = %best.variant,
                mode = %best.mode,
                score = best.score,
                candidates = attempted,
                "best OCR candidate"
            );
            return Ok(best);
        }

        tracing::warn!("OCR battery produced no text, trying direct pass");
        let mode = SegmentationMode::UniformBlock;
        let text = match self.backend.recognize(&gray, &self.config.language, mode) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "direct OCR pass failed");
                return Err(OcrError::TextUnavailable);
            }
        };
        if text.trim().is_empty() {
            return Err(OcrError::TextUnavailable);
        }
        let score = score_text(&text, Variant::Unmodified, self.config.unmodified_bonus);
        Ok(OcrCandidate {
            text,
            variant: Variant::Unmodified,
            mode,
            score,
        })
    }
}

/// Highest score wins; the earliest candidate wins ties.
pub fn select_best(candidates: Vec<OcrCandidate>) -> Option<OcrCandidate> {
    let mut best: Option<OcrCandidate> = None;
    for candidate in candidates {
        match &best {
            Some(current) if candidate.score <= current.score => {}
            _ => best = Some(candidate),
        }
    }
    best
}
