//! Gallery matching by cosine similarity.

use crate::gallery::Gallery;
use crate::types::{MatchResult, Signature};
use serde::{Deserialize, Serialize};

/// Similarity a match must strictly exceed with the FaceNet-style embedder.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Minimum (exclusive) cosine similarity for an accepted match.
    pub similarity_threshold: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Strategy for resolving a probe signature against a gallery.
pub trait Matcher: Send + Sync {
    fn best_match(&self, probe: &Signature, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Linear-scan cosine matcher.
///
/// Every reference signature of every identity is scored. The best candidate
/// only changes on a strictly greater score, so on an exact tie the identity
/// scanned first keeps the slot. Acceptance is also strict: a best score equal
/// to the threshold is a non-match.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(&self, probe: &Signature, gallery: &Gallery, threshold: f32) -> MatchResult {
        let mut best_score = f32::NEG_INFINITY;
        let mut best_id: Option<&str> = None;

        for (identity_id, reference) in gallery.pairs() {
            let score = probe.similarity(reference);
            if score > best_score {
                best_score = score;
                best_id = Some(identity_id);
            }
        }

        match best_id {
            Some(identity_id) if best_score > threshold => MatchResult::Match {
                identity_id: identity_id.to_string(),
                score: best_score,
            },
            Some(_) => MatchResult::NoMatch { best_score },
            None => MatchResult::NoMatch { best_score: 0.0 },
        }
    }
}

/// Match with the default [`CosineMatcher`].
pub fn match_signature(probe: &Signature, gallery: &Gallery, threshold: f32) -> MatchResult {
    CosineMatcher.best_match(probe, gallery, threshold)
}
