//! Face matching: embedding a query face and ranking a stored corpus.
//!
//! Ranking is two-tier. Records within `tolerance` are matches; when none
//! qualify, the closest records under the looser `near_match_ceiling` are
//! offered as near-matches. Anything farther yields an empty result.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::face::{self, FaceBackend};
use crate::types::{CorpusEntry, Embedding, EmbeddingError, MatchResult};

/// Match decision thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    /// Maximum distance accepted as the same person.
    pub tolerance: f32,
    /// Near-matches must be strictly closer than this.
    pub near_match_ceiling: f32,
    pub max_results: usize,
    pub max_near_matches: usize,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            near_match_ceiling: 0.7,
            max_results: 5,
            max_near_matches: 2,
        }
    }
}

pub trait Matcher {
    fn distance(&self, a: &Embedding, b: &Embedding) -> Result<f32, EmbeddingError>;

    fn policy(&self) -> &MatchPolicy;

    /// Rank `corpus` against `query`, ordered by ascending distance.
    ///
    /// Entries whose dimension differs from the query are skipped. A missing
    /// query (no face found) or an empty corpus yields no results.
    fn rank(&self, query: Option<&Embedding>, corpus: &[CorpusEntry]) -> Vec<MatchResult> {
        let Some(query) = query else {
            return Vec::new();
        };
        let policy = self.policy();

        let mut scored: Vec<MatchResult> = corpus
            .iter()
            .filter_map(|entry| match self.distance(query, &entry.embedding) {
                Ok(distance) => Some(MatchResult {
                    record_id: entry.id.clone(),
                    label: entry.label.clone(),
                    distance,
                    is_match: distance <= policy.tolerance,
                }),
                Err(e) => {
                    tracing::warn!(record = %entry.id, error = %e, "skipping corpus entry");
                    None
                }
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let matches = scored.iter().filter(|r| r.is_match).count();
        if matches > 0 {
            scored.retain(|r| r.is_match);
            scored.truncate(policy.max_results);
            tracing::debug!(matches, returned = scored.len(), "face matches found");
            return scored;
        }

        scored.retain(|r| r.distance < policy.near_match_ceiling);
        scored.truncate(policy.max_near_matches.min(policy.max_results));
        tracing::debug!(near_matches = scored.len(), "no match within tolerance");
        scored
    }
}

/// Euclidean distance between embeddings.
#[derive(Debug, Clone, Default)]
pub struct EuclideanMatcher {
    policy: MatchPolicy,
}

impl EuclideanMatcher {
    pub fn new(policy: MatchPolicy) -> Self {
        Self { policy }
    }
}

impl Matcher for EuclideanMatcher {
    fn distance(&self, a: &Embedding, b: &Embedding) -> Result<f32, EmbeddingError> {
        a.euclidean_distance(b)
    }

    fn policy(&self) -> &MatchPolicy {
        &self.policy
    }
}

/// Embed the dominant face of `image`, or `None` when no face is usable.
pub fn embed(backend: &mut dyn FaceBackend, image: &RgbImage) -> Option<Embedding> {
    let faces = face::detect_with_fallback(backend, image);
    let face = face::largest_face(&faces)?;
    match backend.embed(image, face) {
        Ok(embedding) => Some(embedding),
        Err(e) => {
            tracing::warn!(error = %e, "face embedding failed");
            None
        }
    }
}

/// Display similarity `max(0, (1 - distance) * 100)`, rounded to 2 decimals.
pub fn similarity_percent(distance: f32) -> f32 {
    let pct = ((1.0 - distance) * 100.0).max(0.0);
    (pct * 100.0).round() / 100.0
}
