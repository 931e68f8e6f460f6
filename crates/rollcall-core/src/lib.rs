//! rollcall-core: classroom attendance from a single photo.
//!
//! Detects faces with a boosted Haar cascade, embeds them with an ONNX face
//! model, matches signatures against the course gallery and reconciles the
//! matches with the course roster.

pub mod annotate;
pub mod cascade;
pub mod detector;
pub mod embedder;
pub mod enroll;
pub mod gallery;
pub mod image_io;
pub mod matcher;
pub mod reconciler;
pub mod report;
pub mod service;
pub mod store;
pub mod types;

pub use detector::{CascadeDetector, DetectorConfig, FaceDetector};
pub use embedder::{Embedder, EmbedderConfig, OnnxEmbedder};
pub use gallery::Gallery;
pub use matcher::{CosineMatcher, Matcher, RecognitionConfig};
pub use reconciler::{AttendanceOutcome, Reconciler};
pub use report::AttendanceReport;
pub use service::AttendanceService;
pub use store::{AttendanceStore, EnrollmentStore, MemoryStore};
pub use types::{AttendanceRecord, FaceRegion, MatchResult, Roster, RosterEntry, Signature};

use std::path::PathBuf;

/// Default model directory: `$XDG_DATA_HOME/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
