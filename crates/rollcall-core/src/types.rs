use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Axis-aligned face rectangle in source-image pixel coordinates.
///
/// Always non-degenerate and fully inside the image it was detected in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    /// Clip a raw rectangle to `image_width × image_height`.
    ///
    /// Returns `None` when nothing of the rectangle survives clipping.
    pub fn clipped(
        x: i64,
        y: i64,
        width: i64,
        height: i64,
        image_width: u32,
        image_height: u32,
    ) -> Option<Self> {
        let x0 = x.clamp(0, image_width as i64);
        let y0 = y.clamp(0, image_height as i64);
        let x1 = (x + width).clamp(0, image_width as i64);
        let y1 = (y + height).clamp(0, image_height as i64);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignatureError {
    #[error("signature is empty")]
    Empty,
    #[error("signature contains non-finite values")]
    NonFinite,
    #[error("signature has zero norm and cannot be normalized")]
    ZeroNorm,
}

/// Unit-length face signature.
///
/// Construction always L2-normalizes, so the dot product of two signatures
/// is their cosine similarity. Stored signatures are re-normalized on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Signature {
    values: Vec<f32>,
}

impl Signature {
    /// Normalize a raw embedding vector into a signature.
    pub fn from_raw(values: Vec<f32>) -> Result<Self, SignatureError> {
        if values.is_empty() {
            return Err(SignatureError::Empty);
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SignatureError::NonFinite);
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(SignatureError::ZeroNorm);
        }

        Ok(Self {
            values: values.into_iter().map(|v| v / norm).collect(),
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity in [-1, 1].
    ///
    /// Both sides are unit vectors, so this is a plain dot product; the clamp
    /// only absorbs rounding drift (a signature against itself can land a
    /// hair above 1.0). Callers are responsible for matching dimensions.
    pub fn similarity(&self, other: &Signature) -> f32 {
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        dot.clamp(-1.0, 1.0)
    }
}

impl TryFrom<Vec<f32>> for Signature {
    type Error = SignatureError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::from_raw(values)
    }
}

impl From<Signature> for Vec<f32> {
    fn from(signature: Signature) -> Self {
        signature.values
    }
}

/// One enrolled identity eligible to be marked present or absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub identity_id: String,
    pub display_name: String,
}

impl RosterEntry {
    pub fn new(identity_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Ordered enrollment list for one course.
pub type Roster = Vec<RosterEntry>;

/// Outcome of matching one probe signature against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    /// Best candidate scored strictly above the threshold.
    Match { identity_id: String, score: f32 },
    /// No candidate cleared the threshold. `best_score` is 0 for an empty gallery.
    NoMatch { best_score: f32 },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match { .. })
    }

    pub fn score(&self) -> f32 {
        match self {
            MatchResult::Match { score, .. } => *score,
            MatchResult::NoMatch { best_score } => *best_score,
        }
    }

    pub fn identity_id(&self) -> Option<&str> {
        match self {
            MatchResult::Match { identity_id, .. } => Some(identity_id),
            MatchResult::NoMatch { .. } => None,
        }
    }
}

/// A roster identity recognized in the photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentEntry {
    pub identity_id: String,
    pub display_name: String,
    /// Similarity of the accepted match.
    pub confidence: f32,
}

/// A roster identity not recognized in the photo. Never carries a confidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsentEntry {
    pub identity_id: String,
    pub display_name: String,
}

/// Persisted attendance record handed to the attendance store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub course_id: String,
    pub timestamp: DateTime<Utc>,
    pub present: Vec<String>,
    pub absent: Vec<String>,
    pub unrecognized_count: usize,
}
