//! Attendance reconciliation: one classroom photo against one course roster.
//!
//! Detection → per-face signature → gallery match → identity dedup → roster
//! partition → review image. Model-scope failures abort the request; a face
//! that cannot be embedded is demoted to unrecognized and the batch continues.

use crate::annotate::{annotate, AnnotationConfig, LabeledRegion, RegionKind};
use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedError, Embedder};
use crate::gallery::Gallery;
use crate::image_io::{self, DecodeError};
use crate::matcher::{CosineMatcher, Matcher};
use crate::types::{
    AbsentEntry, AttendanceRecord, FaceRegion, MatchResult, PresentEntry, RosterEntry, Signature,
};
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Label drawn on faces that matched no roster identity.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] DecodeError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(EmbedError),
}

/// Roster partition for one photo, plus the material a reviewer needs.
#[derive(Debug, Clone)]
pub struct AttendanceOutcome {
    /// Recognized roster identities, in roster order, one entry per identity.
    pub present: Vec<PresentEntry>,
    /// Roster identities not recognized, in roster order.
    pub absent: Vec<AbsentEntry>,
    /// Crops of every face that failed to match.
    pub unrecognized: Vec<RgbImage>,
    /// Copy of the photo with every detected face boxed and labeled.
    pub annotated_image: RgbImage,
    /// Number of faces the detector returned.
    pub faces_detected: usize,
    /// Explanation when the request took a shortcut path.
    pub note: Option<String>,
}

impl AttendanceOutcome {
    pub fn total_students(&self) -> usize {
        self.present.len() + self.absent.len()
    }

    /// Build the persistence record for this outcome.
    pub fn to_record(&self, course_id: &str, timestamp: DateTime<Utc>) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            course_id: course_id.to_string(),
            timestamp,
            present: self.present.iter().map(|p| p.identity_id.clone()).collect(),
            absent: self.absent.iter().map(|a| a.identity_id.clone()).collect(),
            unrecognized_count: self.unrecognized.len(),
        }
    }
}

/// Runs the recognition pipeline with an injected detector and embedder.
///
/// Holds no per-request state; one instance can serve many requests.
pub struct Reconciler {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn Embedder>,
    matcher: Box<dyn Matcher>,
    annotation: AnnotationConfig,
}

impl Reconciler {
    pub fn new(detector: Arc<dyn FaceDetector>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            detector,
            embedder,
            matcher: Box::new(CosineMatcher),
            annotation: AnnotationConfig::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: impl Matcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    pub fn with_annotation(mut self, annotation: AnnotationConfig) -> Self {
        self.annotation = annotation;
        self
    }

    pub fn detector(&self) -> &Arc<dyn FaceDetector> {
        &self.detector
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Decode `bytes` and reconcile the resulting image.
    pub fn reconcile_bytes(
        &self,
        bytes: &[u8],
        roster: &[RosterEntry],
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<AttendanceOutcome, ReconcileError> {
        let image = image_io::decode(bytes)?;
        self.reconcile(&image, roster, gallery, threshold)
    }

    pub fn reconcile(
        &self,
        image: &RgbImage,
        roster: &[RosterEntry],
        gallery: &Gallery,
        threshold: f32,
    ) -> Result<AttendanceOutcome, ReconcileError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(ReconcileError::InvalidImage(DecodeError::Empty));
        }

        let regions = self.detector.detect(image)?;
        tracing::info!(faces = regions.len(), roster = roster.len(), "faces detected");

        if roster.is_empty() {
            return Ok(self.unknown_only(image, &regions));
        }

        let gallery = gallery.restrict_to(roster);
        tracing::debug!(
            identities = gallery.len(),
            signatures = gallery.signature_count(),
            threshold,
            "gallery restricted to roster"
        );

        // First acceptance per identity wins; later ones are duplicate detections.
        let mut accepted: HashMap<String, f32> = HashMap::new();
        let mut unrecognized = Vec::new();
        let mut labels = Vec::with_capacity(regions.len());

        for (face, region) in regions.iter().enumerate() {
            let crop = image_io::crop(image, region);

            let result = match self.signature_for(&crop, &gallery) {
                Ok(signature) => self.matcher.best_match(&signature, &gallery, threshold),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "embedding model unavailable; aborting");
                    return Err(ReconcileError::ModelUnavailable(e));
                }
                Err(e) => {
                    tracing::warn!(face, error = %e, "face could not be embedded; marking unrecognized");
                    unrecognized.push(crop);
                    labels.push(unknown_label(region));
                    continue;
                }
            };

            match result {
                MatchResult::Match { identity_id, score } => {
                    tracing::debug!(face, identity = %identity_id, score, "face matched");
                    if accepted.contains_key(&identity_id) {
                        tracing::debug!(face, identity = %identity_id, "duplicate detection discarded");
                    } else {
                        accepted.insert(identity_id.clone(), score);
                    }
                    labels.push(LabeledRegion {
                        region: *region,
                        label: identity_id,
                        kind: RegionKind::Matched,
                    });
                }
                MatchResult::NoMatch { best_score } => {
                    tracing::debug!(face, best_score, "face below threshold");
                    unrecognized.push(crop);
                    labels.push(unknown_label(region));
                }
            }
        }

        let (present, absent) = partition_roster(roster, &accepted);
        let annotated_image = annotate(image, &labels, &self.annotation);

        tracing::info!(
            present = present.len(),
            absent = absent.len(),
            unrecognized = unrecognized.len(),
            "attendance reconciled"
        );

        Ok(AttendanceOutcome {
            present,
            absent,
            unrecognized,
            annotated_image,
            faces_detected: regions.len(),
            note: None,
        })
    }

    fn signature_for(&self, crop: &RgbImage, gallery: &Gallery) -> Result<Signature, EmbedError> {
        let signature = self.embedder.embed(crop)?;
        match gallery.dimension() {
            Some(expected) if expected != signature.dimension() => Err(EmbedError::DimensionMismatch {
                expected,
                actual: signature.dimension(),
            }),
            _ => Ok(signature),
        }
    }

    /// Empty roster: nothing can match, so skip embedding and report every
    /// detected face as unrecognized.
    fn unknown_only(&self, image: &RgbImage, regions: &[FaceRegion]) -> AttendanceOutcome {
        let unrecognized: Vec<RgbImage> = regions.iter().map(|r| image_io::crop(image, r)).collect();
        let labels: Vec<LabeledRegion> = regions.iter().map(unknown_label).collect();
        let annotated_image = annotate(image, &labels, &self.annotation);

        tracing::info!(faces = regions.len(), "roster is empty; recognition skipped");

        AttendanceOutcome {
            present: Vec::new(),
            absent: Vec::new(),
            unrecognized,
            annotated_image,
            faces_detected: regions.len(),
            note: Some(format!(
                "No identities are enrolled for this roster. All {} detected face(s) marked as unrecognized.",
                regions.len()
            )),
        }
    }
}

fn unknown_label(region: &FaceRegion) -> LabeledRegion {
    LabeledRegion {
        region: *region,
        label: UNKNOWN_LABEL.to_string(),
        kind: RegionKind::Unmatched,
    }
}

/// Split the roster by membership in the accepted set. Repeated roster
/// entries for the same identity are counted once.
fn partition_roster(
    roster: &[RosterEntry],
    accepted: &HashMap<String, f32>,
) -> (Vec<PresentEntry>, Vec<AbsentEntry>) {
    let mut seen = HashSet::new();
    let mut present = Vec::new();
    let mut absent = Vec::new();

    for entry in roster {
        if !seen.insert(entry.identity_id.as_str()) {
            continue;
        }
        match accepted.get(&entry.identity_id) {
            Some(&confidence) => present.push(PresentEntry {
                identity_id: entry.identity_id.clone(),
                display_name: entry.display_name.clone(),
                confidence,
            }),
            None => absent.push(AbsentEntry {
                identity_id: entry.identity_id.clone(),
                display_name: entry.display_name.clone(),
            }),
        }
    }
    (present, absent)
}
