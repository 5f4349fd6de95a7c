//! Card extraction workflow.
//!
//! localize → OCR → parse on the rectified card, with the unrectified photo
//! as a second chance when the rectified card reads poorly; then portrait
//! cropping and face embedding on whichever image won, again falling back to
//! the original photo.

use image::DynamicImage;
use thiserror::Error;

use crate::config::ExtractionConfig;
use crate::face::FaceBackend;
use crate::fields::FieldParser;
use crate::localize::CardLocalizer;
use crate::matcher;
use crate::normalize::{self, ImageError};
use crate::ocr::{OcrCandidate, OcrError, TextBackend, TextEngine};
use crate::portrait::PortraitExtractor;
use crate::types::{CardFields, Embedding, StudentRecord};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    InvalidImage(#[from] ImageError),
}

/// Transcription and parsed fields of one image.
struct TextPass {
    candidate: Option<OcrCandidate>,
    fields: CardFields,
}

/// Extracts [`StudentRecord`]s from card photos.
///
/// Owns its OCR and face backends; one reader serves one caller at a time.
pub struct CardReader {
    config: ExtractionConfig,
    localizer: CardLocalizer,
    text: TextEngine,
    parser: FieldParser,
    portraits: PortraitExtractor,
    faces: Box<dyn FaceBackend>,
}

impl CardReader {
    pub fn new(
        config: ExtractionConfig,
        text_backend: Box<dyn TextBackend>,
        faces: Box<dyn FaceBackend>,
    ) -> Self {
        Self {
            localizer: CardLocalizer::new(config.localizer.clone()),
            text: TextEngine::new(text_backend, config.ocr.clone()),
            parser: FieldParser::new(config.fields.clone()),
            portraits: PortraitExtractor::new(config.portrait.clone()),
            faces,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Run the full extraction pass over one photo.
    ///
    /// Only an empty image is an error; every stage that finds nothing leaves
    /// its field of the record empty.
    pub fn extract(&mut self, image: &DynamicImage) -> Result<StudentRecord, ExtractError> {
        normalize::ensure_valid(image)?;
        let located = self.localizer.localize(image)?;

        let mut pass = self.text_pass(&located.card)?;
        let mut on_original = !located.success;

        let rectified_yield = pass.fields.count();
        if located.success && rectified_yield < self.config.min_fields_before_retry {
            let retry = self.text_pass(image)?;
            let original_yield = retry.fields.count();
            tracing::info!(
                rectified = rectified_yield,
                original = original_yield,
                "low field yield, parsed unrectified photo too"
            );
            if original_yield > rectified_yield {
                pass = retry;
                on_original = true;
            }
        }

        let working = if on_original { image } else { &located.card };
        let working_rgb = working.to_rgb8();

        let mut portrait = self.portraits.extract(self.faces.as_mut(), &working_rgb);
        let mut face_embedding = matcher::embed(self.faces.as_mut(), &working_rgb);

        if !on_original && (portrait.is_none() || face_embedding.is_none()) {
            let original_rgb = image.to_rgb8();
            if portrait.is_none() {
                tracing::debug!("no portrait on rectified card, trying original");
                portrait = self.portraits.extract(self.faces.as_mut(), &original_rgb);
            }
            if face_embedding.is_none() {
                tracing::debug!("no embedding on rectified card, trying original");
                face_embedding = matcher::embed(self.faces.as_mut(), &original_rgb);
            }
        }

        let record = StudentRecord {
            fields: pass.fields,
            raw_text: pass.candidate.map(|c| c.text).unwrap_or_default(),
            portrait,
            face_embedding,
        };
        tracing::info!(
            fields = record.fields_recovered(),
            rectified = located.success,
            used_original = on_original,
            portrait = record.portrait.is_some(),
            embedding = record.face_embedding.is_some(),
            "extraction complete"
        );
        Ok(record)
    }

    /// Embedding of the dominant face in `image`.
    pub fn embed(&mut self, image: &DynamicImage) -> Result<Option<Embedding>, ExtractError> {
        normalize::ensure_valid(image)?;
        Ok(matcher::embed(self.faces.as_mut(), &image.to_rgb8()))
    }

    fn text_pass(&self, image: &DynamicImage) -> Result<TextPass, ExtractError> {
        match self.text.acquire(image) {
            Ok(candidate) => {
                let fields = self.parser.parse(&candidate.text);
                Ok(TextPass {
                    candidate: Some(candidate),
                    fields,
                })
            }
            Err(OcrError::InvalidImage(e)) => Err(e.into()),
            Err(e) => {
                tracing::warn!(error = %e, "no text acquired");
                Ok(TextPass {
                    candidate: None,
                    fields: CardFields::default(),
                })
            }
        }
    }
}
