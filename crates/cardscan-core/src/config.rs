//! Extraction configuration.
//!
//! Every tunable of the pipeline lives here with the defaults used for the
//! student-card layout. Configs deserialize from TOML; missing sections and
//! keys fall back to their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::MatchPolicy;
use crate::ocr::SegmentationMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration for one [`CardReader`](crate::pipeline::CardReader).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub localizer: LocalizerConfig,
    pub ocr: OcrConfig,
    pub fields: FieldConfig,
    pub portrait: PortraitConfig,
    pub matching: MatchPolicy,
    /// When the rectified card yields fewer fields than this, the unrectified
    /// original is parsed too and the better yield wins.
    pub min_fields_before_retry: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            localizer: LocalizerConfig::default(),
            ocr: OcrConfig::default(),
            fields: FieldConfig::default(),
            portrait: PortraitConfig::default(),
            matching: MatchPolicy::default(),
            min_fields_before_retry: 2,
        }
    }
}

impl ExtractionConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }
}

/// Card boundary detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    /// Detection runs on a copy downscaled to fit these bounds.
    pub max_width: u32,
    pub max_height: u32,
    pub contrast_alpha: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Chebyshev radius of the edge dilation (3×3 kernel, two passes).
    pub dilate_radius: u8,
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    pub polygon_epsilon: f64,
    /// Minimum quadrilateral area as a fraction of the image area.
    pub min_area_ratio: f64,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            contrast_alpha: 1.5,
            canny_low: 50.0,
            canny_high: 150.0,
            dilate_radius: 2,
            polygon_epsilon: 0.02,
            min_area_ratio: 0.10,
        }
    }
}

/// Text acquisition battery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Language hint passed to the backend (Tesseract `-l`).
    pub language: String,
    /// Images narrower than this get an upscaled variant.
    pub upscale_width: u32,
    pub contrast_alpha: f32,
    pub bilateral_diameter: u32,
    pub bilateral_sigma: f32,
    /// Score bonus for the unmodified grayscale variant.
    pub unmodified_bonus: u32,
    pub modes: Vec<SegmentationMode>,
    /// Run variants on scoped worker threads.
    pub parallel: bool,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "vie+eng".to_string(),
            upscale_width: 800,
            contrast_alpha: 1.2,
            bilateral_diameter: 5,
            bilateral_sigma: 50.0,
            unmodified_bonus: 100,
            modes: SegmentationMode::ALL.to_vec(),
            parallel: false,
        }
    }
}

/// Field parser domain assumptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Issuing-year prefix of student ID numbers.
    pub id_prefix: String,
    pub id_length: usize,
    /// Typical enrollment birth year; the closest birth date wins.
    pub birth_year_anchor: i32,
    /// Reference start year; the closest academic term wins.
    pub term_year_anchor: i32,
    pub issuance_window_start: i32,
    pub issuance_window_end: i32,
    /// Institution-name tokens that are never part of a person's name.
    pub exclude_words: Vec<String>,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            id_prefix: "20".to_string(),
            id_length: 8,
            birth_year_anchor: 2004,
            term_year_anchor: 2022,
            issuance_window_start: 2020,
            issuance_window_end: 2030,
            exclude_words: [
                "UNIVERSITY",
                "TECHNOLOGY",
                "EAST",
                "ASIA",
                "OF",
                "THE",
                "AND",
                "TRƯỜNG",
                "ĐẠI",
                "HỌC",
                "CÔNG",
                "NGHỆ",
                "ĐÔNG",
                "Á",
                "UNIVERSITY OF TECHNOLOGY",
                "EAST ASIA",
                "THẺ",
                "SINH",
                "VIÊN",
                "STUDENT",
                "CARD",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Portrait cropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortraitConfig {
    pub base_padding: u32,
    /// Images whose longer edge is below this are upscaled before detection.
    pub min_edge: u32,
}

impl Default for PortraitConfig {
    fn default() -> Self {
        Self {
            base_padding: 20,
            min_edge: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ExtractionConfig::default();
        assert_eq!(cfg.localizer.max_width, 1920);
        assert_eq!(cfg.ocr.language, "vie+eng");
        assert_eq!(cfg.ocr.modes.len(), 4);
        assert_eq!(cfg.fields.birth_year_anchor, 2004);
        assert_eq!(cfg.fields.term_year_anchor, 2022);
        assert_eq!(cfg.portrait.min_edge, 500);
        assert!((cfg.matching.tolerance - 0.5).abs() < 1e-6);
        assert_eq!(cfg.min_fields_before_retry, 2);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg = ExtractionConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, ExtractionConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let src = r#"
            min_fields_before_retry = 3

            [fields]
            id_prefix = "19"
            birth_year_anchor = 2001

            [ocr]
            modes = ["uniform_block", "sparse_text"]
            parallel = true

            [matching]
            tolerance = 0.45
        "#;
        let cfg = ExtractionConfig::from_toml_str(src).unwrap();
        assert_eq!(cfg.min_fields_before_retry, 3);
        assert_eq!(cfg.fields.id_prefix, "19");
        assert_eq!(cfg.fields.birth_year_anchor, 2001);
        assert_eq!(cfg.fields.term_year_anchor, 2022);
        assert_eq!(
            cfg.ocr.modes,
            vec![SegmentationMode::UniformBlock, SegmentationMode::SparseText]
        );
        assert!(cfg.ocr.parallel);
        assert!((cfg.matching.tolerance - 0.45).abs() < 1e-6);
        assert_eq!(cfg.matching.max_results, 5);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            ExtractionConfig::from_toml_str("[fields]\nid_length = \"eight\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[portrait]\nbase_padding = 12").unwrap();
        let cfg = ExtractionConfig::load(file.path()).unwrap();
        assert_eq!(cfg.portrait.base_padding, 12);
        assert_eq!(cfg.portrait.min_edge, 500);

        let missing = ExtractionConfig::load(Path::new("/nonexistent/cardscan.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
