//! Reference signature generation for enrollment.

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedError, Embedder};
use crate::image_io::{self, DecodeError};
use crate::types::{FaceRegion, Signature};
use thiserror::Error;

// --- Named constants ---

/// Upper bound on reference photos accepted per enrollment request.
pub const MAX_ENROLL_IMAGES: usize = 5;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid image: {0}")]
    InvalidImage(#[from] DecodeError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedError),
    #[error("at most {max} images per enrollment, got {given}")]
    TooManyImages { max: usize, given: usize },
    #[error("no image produced a signature: {}", .0.join("; "))]
    NoValidImages(Vec<String>),
}

/// Signatures produced by [`enroll_images`] plus per-image problems that
/// were skipped over.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentBatch {
    pub signatures: Vec<Signature>,
    pub warnings: Vec<String>,
}

/// Compute a reference signature from one enrollment photo.
///
/// Uses the largest detected face; the first one wins a tie.
pub fn signature_from_image(
    detector: &dyn FaceDetector,
    embedder: &dyn Embedder,
    bytes: &[u8],
) -> Result<Signature, EnrollError> {
    let image = image_io::decode(bytes)?;
    let faces = detector.detect(&image)?;
    let face = largest(&faces).ok_or(EnrollError::NoFaceDetected)?;

    tracing::debug!(faces = faces.len(), region = ?face, "embedding largest face");
    let crop = image_io::crop(&image, face);
    Ok(embedder.embed(&crop)?)
}

/// Compute signatures for a batch of named enrollment photos.
///
/// Failing images become warnings. The batch fails only if no image yields a
/// signature or the embedding model itself is unavailable.
pub fn enroll_images(
    detector: &dyn FaceDetector,
    embedder: &dyn Embedder,
    images: &[(String, Vec<u8>)],
) -> Result<EnrollmentBatch, EnrollError> {
    if images.len() > MAX_ENROLL_IMAGES {
        return Err(EnrollError::TooManyImages {
            max: MAX_ENROLL_IMAGES,
            given: images.len(),
        });
    }

    let mut batch = EnrollmentBatch::default();
    for (name, bytes) in images {
        match signature_from_image(detector, embedder, bytes) {
            Ok(signature) => batch.signatures.push(signature),
            Err(EnrollError::Embedding(e)) if e.is_fatal() => return Err(EnrollError::Embedding(e)),
            Err(e) => {
                tracing::warn!(image = %name, error = %e, "skipping enrollment image");
                batch.warnings.push(format!("{name}: {e}"));
            }
        }
    }

    if batch.signatures.is_empty() {
        return Err(EnrollError::NoValidImages(batch.warnings));
    }

    tracing::info!(
        signatures = batch.signatures.len(),
        skipped = batch.warnings.len(),
        "enrollment signatures generated"
    );
    Ok(batch)
}

fn largest(faces: &[FaceRegion]) -> Option<&FaceRegion> {
    faces
        .iter()
        .reduce(|best, face| if face.area() > best.area() { face } else { best })
}
