//! Transport form of an attendance outcome: images as base64 JPEG, ready to
//! embed in a JSON response.

use crate::image_io::{self, EncodeError};
use crate::reconciler::AttendanceOutcome;
use crate::types::{AbsentEntry, PresentEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceReport {
    pub course_id: String,
    pub timestamp: DateTime<Utc>,
    pub present: Vec<PresentEntry>,
    pub absent: Vec<AbsentEntry>,
    /// Base64 JPEG crops of faces that matched nobody.
    pub unrecognized: Vec<String>,
    /// Base64 JPEG of the annotated review image.
    pub annotated_image: String,
    pub total_detected: usize,
    pub total_students: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AttendanceReport {
    pub fn from_outcome(
        course_id: &str,
        timestamp: DateTime<Utc>,
        outcome: &AttendanceOutcome,
    ) -> Result<Self, EncodeError> {
        let unrecognized = outcome
            .unrecognized
            .iter()
            .map(image_io::encode_base64_jpeg)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            course_id: course_id.to_string(),
            timestamp,
            present: outcome.present.clone(),
            absent: outcome.absent.clone(),
            unrecognized,
            annotated_image: image_io::encode_base64_jpeg(&outcome.annotated_image)?,
            total_detected: outcome.faces_detected,
            total_students: outcome.total_students(),
            message: outcome.note.clone(),
        })
    }
}
