use chrono::NaiveDate;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Divide every coordinate by `factor`, undoing an upscale of the source image.
    pub fn unscaled(&self, factor: f32) -> BoundingBox {
        if factor == 1.0 || factor <= 0.0 {
            return self.clone();
        }
        BoundingBox {
            x: self.x / factor,
            y: self.y / factor,
            width: self.width / factor,
            height: self.height / factor,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx / factor, ly / factor))),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("not an embedding blob (bad magic)")]
    BadMagic,
    #[error("unsupported embedding blob version {0}")]
    UnsupportedVersion(u8),
    #[error("embedding blob truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("embedding blob has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("embedding model version is not valid UTF-8")]
    InvalidModelVersion,
}

const BLOB_MAGIC: &[u8; 4] = b"CSEM";
const BLOB_VERSION: u8 = 1;

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Euclidean distance between two embeddings of equal dimensionality.
    pub fn euclidean_distance(&self, other: &Embedding) -> Result<f32, EmbeddingError> {
        if self.values.len() != other.values.len() {
            return Err(EmbeddingError::DimensionMismatch {
                left: self.values.len(),
                right: other.values.len(),
            });
        }
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }

    /// Serialize to the storage blob format.
    ///
    /// Layout: `b"CSEM"`, version byte, `u32` LE dimension, LE `f32` values,
    /// `u16` LE model-version length, UTF-8 model version.
    pub fn to_blob(&self) -> Vec<u8> {
        let version = self.model_version.as_deref().unwrap_or("").as_bytes();
        let version = &version[..version.len().min(u16::MAX as usize)];

        let mut out = Vec::with_capacity(4 + 1 + 4 + self.values.len() * 4 + 2 + version.len());
        out.extend_from_slice(BLOB_MAGIC);
        out.push(BLOB_VERSION);
        out.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&(version.len() as u16).to_le_bytes());
        out.extend_from_slice(version);
        out
    }

    /// Parse a blob written by [`to_blob`](Self::to_blob). Values round-trip bit-exactly.
    pub fn from_blob(bytes: &[u8]) -> Result<Self, BlobError> {
        let mut reader = BlobReader { bytes, pos: 0 };

        if reader.take(4)? != BLOB_MAGIC {
            return Err(BlobError::BadMagic);
        }
        let version = reader.take(1)?[0];
        if version != BLOB_VERSION {
            return Err(BlobError::UnsupportedVersion(version));
        }

        let dim = u32::from_le_bytes(reader.array::<4>()?) as usize;
        let raw = reader.take(dim.saturating_mul(4))?;
        let values = raw
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let version_len = u16::from_le_bytes(reader.array::<2>()?) as usize;
        let version_bytes = reader.take(version_len)?;
        let model_version = if version_len == 0 {
            None
        } else {
            Some(
                std::str::from_utf8(version_bytes)
                    .map_err(|_| BlobError::InvalidModelVersion)?
                    .to_string(),
            )
        };

        let trailing = bytes.len() - reader.pos;
        if trailing > 0 {
            return Err(BlobError::TrailingBytes(trailing));
        }

        Ok(Self {
            values,
            model_version,
        })
    }
}

struct BlobReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BlobError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        match end {
            Some(end) => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(BlobError::Truncated {
                needed: self.pos.saturating_add(n),
                available: self.bytes.len(),
            }),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BlobError> {
        let slice = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

/// A stored embedding with the record it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    pub id: String,
    pub label: String,
    pub embedding: Embedding,
}

/// One ranked candidate for a face search query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// ID of the corpus record.
    pub record_id: String,
    /// Label of the corpus record.
    pub label: String,
    /// Euclidean distance to the query embedding.
    pub distance: f32,
    /// `distance <= tolerance`.
    pub is_match: bool,
}

impl MatchResult {
    /// Display similarity in percent; see [`crate::matcher::similarity_percent`].
    pub fn similarity_percent(&self) -> f32 {
        crate::matcher::similarity_percent(self.distance)
    }
}

/// Academic term such as `2022-2027`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct AcademicTerm {
    pub start: i32,
    pub end: i32,
}

impl fmt::Display for AcademicTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for AcademicTerm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(['-', '/'])
            .ok_or_else(|| format!("academic term must look like YYYY-YYYY, got {s:?}"))?;
        let start = start
            .trim()
            .parse()
            .map_err(|e| format!("bad start year in {s:?}: {e}"))?;
        let end = end
            .trim()
            .parse()
            .map_err(|e| format!("bad end year in {s:?}: {e}"))?;
        Ok(Self { start, end })
    }
}

impl From<AcademicTerm> for String {
    fn from(term: AcademicTerm) -> Self {
        term.to_string()
    }
}

impl TryFrom<String> for AcademicTerm {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The five structured fields parsed from a card transcription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardFields {
    pub id_number: Option<String>,
    pub full_name: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub academic_term: Option<AcademicTerm>,
    pub expiry_date: Option<NaiveDate>,
}

impl CardFields {
    pub const TOTAL: usize = 5;

    /// Number of fields that were recovered.
    pub fn count(&self) -> usize {
        [
            self.id_number.is_some(),
            self.full_name.is_some(),
            self.birth_date.is_some(),
            self.academic_term.is_some(),
            self.expiry_date.is_some(),
        ]
        .iter()
        .filter(|&&found| found)
        .count()
    }
}

/// Pixel rectangle in source-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Head-and-neck crop of the dominant face on a card.
#[derive(Debug, Clone)]
pub struct Portrait {
    pub image: RgbImage,
    /// Detected face box in source-image coordinates.
    pub face: BoundingBox,
    /// Padded crop window in source-image coordinates.
    pub crop: CropRect,
}

/// Output of one extraction pass over a card photo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentRecord {
    #[serde(flatten)]
    pub fields: CardFields,
    pub raw_text: String,
    #[serde(skip)]
    pub portrait: Option<Portrait>,
    pub face_embedding: Option<Embedding>,
}

impl StudentRecord {
    /// How many of the five structured fields were recovered.
    pub fn fields_recovered(&self) -> usize {
        self.fields.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a).unwrap(), 0.0);
    }

    #[test]
    fn test_euclidean_distance_dimension_mismatch() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(
            a.euclidean_distance(&b),
            Err(EmbeddingError::DimensionMismatch { left: 2, right: 3 })
        );
    }

    #[test]
    fn test_blob_roundtrip_is_bit_exact() {
        let values = vec![0.1f32, -0.0, f32::MIN_POSITIVE, 1.0e-38, -123.456, 0.333_333_34];
        let emb = Embedding {
            values: values.clone(),
            model_version: Some("w600k_r50".into()),
        };
        let decoded = Embedding::from_blob(&emb.to_blob()).unwrap();
        let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&decoded.values), bits(&values));
        assert_eq!(decoded.model_version.as_deref(), Some("w600k_r50"));
    }

    #[test]
    fn test_blob_without_model_version() {
        let emb = Embedding::new(vec![1.5; 128]);
        let blob = emb.to_blob();
        assert_eq!(blob.len(), 4 + 1 + 4 + 128 * 4 + 2);
        assert_eq!(Embedding::from_blob(&blob).unwrap(), emb);
    }

    #[test]
    fn test_blob_rejects_bad_magic() {
        let mut blob = Embedding::new(vec![1.0]).to_blob();
        blob[0] = b'X';
        assert_eq!(Embedding::from_blob(&blob), Err(BlobError::BadMagic));
    }

    #[test]
    fn test_blob_rejects_truncation() {
        let blob = Embedding::new(vec![1.0, 2.0, 3.0]).to_blob();
        let err = Embedding::from_blob(&blob[..blob.len() - 5]).unwrap_err();
        assert!(matches!(err, BlobError::Truncated { .. }), "got {err:?}");
    }

    #[test]
    fn test_blob_rejects_trailing_bytes() {
        let mut blob = Embedding::new(vec![1.0]).to_blob();
        blob.push(0);
        assert_eq!(Embedding::from_blob(&blob), Err(BlobError::TrailingBytes(1)));
    }

    #[test]
    fn test_blob_rejects_unknown_version() {
        let mut blob = Embedding::new(vec![1.0]).to_blob();
        blob[4] = 9;
        assert_eq!(Embedding::from_blob(&blob), Err(BlobError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_academic_term_string_form() {
        let term: AcademicTerm = "2022-2027".parse().unwrap();
        assert_eq!(term, AcademicTerm { start: 2022, end: 2027 });
        assert_eq!(term.to_string(), "2022-2027");
        assert_eq!(serde_json::to_string(&term).unwrap(), "\"2022-2027\"");
        assert!("2022".parse::<AcademicTerm>().is_err());
    }

    #[test]
    fn test_fields_count() {
        let mut fields = CardFields::default();
        assert_eq!(fields.count(), 0);
        fields.id_number = Some("20220991".into());
        fields.expiry_date = NaiveDate::from_ymd_opt(2027, 12, 31);
        assert_eq!(fields.count(), 2);
    }

    #[test]
    fn test_record_json_flattens_fields() {
        let record = StudentRecord {
            fields: CardFields {
                id_number: Some("20220991".into()),
                birth_date: NaiveDate::from_ymd_opt(2004, 5, 2),
                ..Default::default()
            },
            raw_text: "Mã SV: 20220991".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id_number"], "20220991");
        assert_eq!(json["birth_date"], "2004-05-02");
        assert!(json["full_name"].is_null());
        assert!(json.get("portrait").is_none());
    }

    #[test]
    fn test_bbox_unscaled() {
        let b = BoundingBox {
            x: 100.0,
            y: 50.0,
            width: 40.0,
            height: 60.0,
            confidence: 0.9,
            landmarks: Some([(110.0, 70.0); 5]),
        };
        let u = b.unscaled(2.0);
        assert_eq!((u.x, u.y, u.width, u.height), (50.0, 25.0, 20.0, 30.0));
        assert_eq!(u.landmarks.unwrap()[0], (55.0, 35.0));
        assert_eq!(b.area(), 2400.0);
    }
}
