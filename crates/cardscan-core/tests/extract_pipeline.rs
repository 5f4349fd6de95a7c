//! End-to-end extraction with scripted OCR and face backends.

use std::sync::{Arc, Mutex};

use cardscan_core::face::FaceError;
use cardscan_core::ocr::OcrError;
use cardscan_core::{
    AcademicTerm, BoundingBox, CardReader, DetectionMode, Embedding, ExtractError,
    ExtractionConfig, FaceBackend, SegmentationMode, TextBackend,
};
use chrono::NaiveDate;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

const CARD_TEXT: &str = "TRƯỜNG ĐẠI HỌC CÔNG NGHỆ ĐÔNG Á\n\
    THẺ SINH VIÊN\n\
    Họ & tên: TRẦN THỊ MAI\n\
    Ngày sinh: 14/09/2004\n\
    Mã SV: 20221234\n\
    Niên khóa: 2022-2026\n\
    Có giá trị đến: 30/06/2027\n";

const CORNERS: [(i32, i32); 4] = [(80, 60), (330, 95), (310, 250), (60, 215)];

/// 400×300 photo of a bright card on a dark table.
fn card_photo() -> DynamicImage {
    let mut img = GrayImage::from_pixel(400, 300, Luma([20]));
    let poly: Vec<Point<i32>> = CORNERS.iter().map(|&(x, y)| Point::new(x, y)).collect();
    draw_polygon_mut(&mut img, &poly, Luma([235]));
    DynamicImage::ImageLuma8(img)
}

/// The photo (and its rescaled copies) keep the 4:3 frame; the rectified card does not.
fn is_photo_frame(width: u32, height: u32) -> bool {
    width * 3 == height * 4
}

#[derive(Clone, Copy)]
enum TextScript {
    /// Card text only readable on the unrectified photo.
    PhotoOnly,
    Everywhere,
    Nowhere,
}

struct ScriptedOcr {
    script: TextScript,
    seen: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl TextBackend for ScriptedOcr {
    fn recognize(
        &self,
        image: &GrayImage,
        _language: &str,
        _mode: SegmentationMode,
    ) -> Result<String, OcrError> {
        let (w, h) = image.dimensions();
        self.seen.lock().unwrap().push((w, h));
        match self.script {
            TextScript::Everywhere => Ok(CARD_TEXT.to_string()),
            TextScript::PhotoOnly if is_photo_frame(w, h) => Ok(CARD_TEXT.to_string()),
            TextScript::PhotoOnly => Ok("~~ ##".to_string()),
            TextScript::Nowhere => Err(OcrError::Engine("engine offline".into())),
        }
    }
}

/// Finds one face, but only on the unrectified photo frame.
struct PhotoFaces;

impl FaceBackend for PhotoFaces {
    fn detect(
        &mut self,
        image: &RgbImage,
        _mode: DetectionMode,
    ) -> Result<Vec<BoundingBox>, FaceError> {
        let (w, h) = image.dimensions();
        if !is_photo_frame(w, h) {
            return Ok(Vec::new());
        }
        Ok(vec![BoundingBox {
            x: w as f32 * 0.6,
            y: h as f32 * 0.4,
            width: w as f32 * 0.1,
            height: h as f32 * 0.15,
            confidence: 0.92,
            landmarks: None,
        }])
    }

    fn embed(&mut self, image: &RgbImage, _face: &BoundingBox) -> Result<Embedding, FaceError> {
        Ok(Embedding::new(vec![image.width() as f32, image.height() as f32]))
    }
}

fn reader(script: TextScript) -> (CardReader, Arc<Mutex<Vec<(u32, u32)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let ocr = ScriptedOcr {
        script,
        seen: Arc::clone(&seen),
    };
    let reader = CardReader::new(ExtractionConfig::default(), Box::new(ocr), Box::new(PhotoFaces));
    (reader, seen)
}

#[test]
fn test_retry_on_original_when_rectified_reads_poorly() {
    let (mut reader, seen) = reader(TextScript::PhotoOnly);
    let record = reader.extract(&card_photo()).unwrap();

    assert_eq!(record.fields_recovered(), 5);
    assert_eq!(record.fields.id_number.as_deref(), Some("20221234"));
    assert_eq!(record.fields.full_name.as_deref(), Some("TRẦN THỊ MAI"));
    assert_eq!(record.fields.birth_date, NaiveDate::from_ymd_opt(2004, 9, 14));
    assert_eq!(
        record.fields.academic_term,
        Some(AcademicTerm {
            start: 2022,
            end: 2026
        })
    );
    assert_eq!(record.fields.expiry_date, NaiveDate::from_ymd_opt(2027, 6, 30));
    assert_eq!(record.raw_text, CARD_TEXT);

    let calls = seen.lock().unwrap();
    assert!(calls.iter().any(|&(w, h)| !is_photo_frame(w, h)), "rectified card never read");
    assert!(calls.contains(&(400, 300)), "original photo never read");

    // Portrait and embedding come from the photo that won the text pass.
    let portrait = record.portrait.expect("portrait on original photo");
    assert!(portrait.crop.x + portrait.crop.width <= 400);
    assert!(portrait.crop.y + portrait.crop.height <= 300);
    assert_eq!(record.face_embedding.unwrap().values, vec![400.0, 300.0]);
}

#[test]
fn test_rectified_card_kept_when_it_reads_well() {
    let (mut reader, seen) = reader(TextScript::Everywhere);
    let record = reader.extract(&card_photo()).unwrap();

    assert_eq!(record.fields_recovered(), 5);
    let calls = seen.lock().unwrap();
    assert!(
        calls.iter().all(|&(w, h)| !is_photo_frame(w, h)),
        "original photo should not be read: {calls:?}"
    );

    // No face on the rectified card, so both fall back to the photo.
    assert!(record.portrait.is_some());
    assert_eq!(record.face_embedding.unwrap().values, vec![400.0, 300.0]);
}

#[test]
fn test_unlocalized_photo_is_processed_directly() {
    let blank = DynamicImage::ImageLuma8(GrayImage::from_pixel(400, 300, Luma([128])));
    let (mut reader, seen) = reader(TextScript::PhotoOnly);
    let record = reader.extract(&blank).unwrap();

    assert_eq!(record.fields_recovered(), 5);
    assert!(seen.lock().unwrap().iter().all(|&(w, h)| is_photo_frame(w, h)));
    assert!(record.portrait.is_some());
}

#[test]
fn test_no_text_is_not_an_error() {
    let (mut reader, _) = reader(TextScript::Nowhere);
    let record = reader.extract(&card_photo()).unwrap();
    assert_eq!(record.fields_recovered(), 0);
    assert!(record.raw_text.is_empty());
    assert!(record.face_embedding.is_some());
}

#[test]
fn test_empty_image_is_rejected() {
    let (mut reader, _) = reader(TextScript::Everywhere);
    let err = reader.extract(&DynamicImage::new_rgb8(0, 0)).unwrap_err();
    assert!(matches!(err, ExtractError::InvalidImage(_)));
}

#[test]
fn test_record_json_omits_portrait() {
    let (mut reader, _) = reader(TextScript::Everywhere);
    let record = reader.extract(&card_photo()).unwrap();
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["id_number"], "20221234");
    assert_eq!(json["academic_term"], "2022-2026");
    assert!(json.get("portrait").is_none());
}
