//! Store interfaces consumed by the attendance pipeline, and an in-memory
//! implementation.
//!
//! The pipeline only reads rosters and signatures; persisting attendance is
//! left to the caller.

use crate::gallery::{Gallery, GalleryError};
use crate::types::{AttendanceRecord, Roster, RosterEntry, Signature};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// --- Named constants ---

/// Maximum number of records returned by a history query.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("unknown student: {0}")]
    UnknownStudent(String),
}

/// Source of rosters and reference signatures.
pub trait EnrollmentStore {
    /// Enrolled identities for a course, in enrollment order. An unknown
    /// course has an empty roster.
    fn roster(&self, course_id: &str) -> Result<Roster, StoreError>;

    /// Reference signatures for the given identities. Identities without
    /// signatures are left out.
    fn signatures(&self, identity_ids: &[String]) -> Result<Gallery, StoreError>;
}

/// Sink for confirmed attendance records.
pub trait AttendanceStore {
    fn store_attendance(&mut self, record: AttendanceRecord) -> Result<(), StoreError>;

    /// Records newest first, optionally filtered by course and UTC calendar
    /// date, at most [`HISTORY_LIMIT`] of them.
    fn attendance_history(
        &self,
        course_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError>;
}

/// Apply the history query rules to a set of records.
pub fn filter_history<'a>(
    records: impl IntoIterator<Item = &'a AttendanceRecord>,
    course_id: Option<&str>,
    date: Option<NaiveDate>,
) -> Vec<AttendanceRecord> {
    let mut matching: Vec<AttendanceRecord> = records
        .into_iter()
        .filter(|r| course_id.map_or(true, |c| r.course_id == c))
        .filter(|r| date.map_or(true, |d| r.timestamp.date_naive() == d))
        .cloned()
        .collect();
    matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    matching.truncate(HISTORY_LIMIT);
    matching
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub display_name: String,
    #[serde(default)]
    pub signatures: Vec<Signature>,
}

/// Students, their signatures and course enrollments held in memory.
///
/// Serializable so file-backed stores can persist it as a whole. Attendance
/// records are kept in memory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    #[serde(default)]
    students: BTreeMap<String, StudentRecord>,
    /// Course → enrolled identity ids, in enrollment order.
    #[serde(default)]
    courses: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    attendance: Vec<AttendanceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a student, or rename an existing one.
    pub fn add_student(&mut self, identity_id: &str, display_name: &str) {
        self.students
            .entry(identity_id.to_string())
            .and_modify(|s| s.display_name = display_name.to_string())
            .or_insert_with(|| StudentRecord {
                display_name: display_name.to_string(),
                signatures: Vec::new(),
            });
    }

    /// Append reference signatures for a registered student.
    pub fn add_signatures(
        &mut self,
        identity_id: &str,
        signatures: Vec<Signature>,
    ) -> Result<(), StoreError> {
        if !self.students.contains_key(identity_id) {
            return Err(StoreError::UnknownStudent(identity_id.to_string()));
        }

        let expected = self
            .dimension()
            .or_else(|| signatures.first().map(Signature::dimension));
        if let Some(expected) = expected {
            if let Some(bad) = signatures.iter().find(|s| s.dimension() != expected) {
                return Err(GalleryError::DimensionMismatch {
                    identity_id: identity_id.to_string(),
                    expected,
                    actual: bad.dimension(),
                }
                .into());
            }
        }

        if let Some(student) = self.students.get_mut(identity_id) {
            student.signatures.extend(signatures);
        }
        Ok(())
    }

    /// Enroll a registered student in a course. Enrolling twice is a no-op.
    pub fn enroll(&mut self, course_id: &str, identity_id: &str) -> Result<(), StoreError> {
        if !self.students.contains_key(identity_id) {
            return Err(StoreError::UnknownStudent(identity_id.to_string()));
        }
        let members = self.courses.entry(course_id.to_string()).or_default();
        if !members.iter().any(|m| m == identity_id) {
            members.push(identity_id.to_string());
        }
        Ok(())
    }

    pub fn student(&self, identity_id: &str) -> Option<&StudentRecord> {
        self.students.get(identity_id)
    }

    pub fn student_count(&self) -> usize {
        self.students.len()
    }

    pub fn course_ids(&self) -> impl Iterator<Item = &str> {
        self.courses.keys().map(String::as_str)
    }

    /// Signature dimensionality shared by every stored signature.
    pub fn dimension(&self) -> Option<usize> {
        self.students
            .values()
            .find_map(|s| s.signatures.first())
            .map(Signature::dimension)
    }
}

impl EnrollmentStore for MemoryStore {
    fn roster(&self, course_id: &str) -> Result<Roster, StoreError> {
        let Some(members) = self.courses.get(course_id) else {
            return Ok(Roster::new());
        };
        let roster = members
            .iter()
            .filter_map(|id| match self.students.get(id) {
                Some(student) => Some(RosterEntry::new(id.as_str(), student.display_name.as_str())),
                None => {
                    tracing::warn!(course = course_id, identity = %id, "enrolled identity has no student record");
                    None
                }
            })
            .collect();
        Ok(roster)
    }

    fn signatures(&self, identity_ids: &[String]) -> Result<Gallery, StoreError> {
        let entries = identity_ids.iter().filter_map(|id| {
            self.students
                .get(id)
                .map(|student| (id.as_str(), student.signatures.clone()))
        });
        Ok(Gallery::from_entries(entries)?)
    }
}

impl AttendanceStore for MemoryStore {
    fn store_attendance(&mut self, record: AttendanceRecord) -> Result<(), StoreError> {
        self.attendance.push(record);
        Ok(())
    }

    fn attendance_history(
        &self,
        course_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        Ok(filter_history(&self.attendance, course_id, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    fn sig(values: &[f32]) -> Signature {
        Signature::from_raw(values.to_vec()).unwrap()
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.add_student("S1", "Alice");
        store.add_student("S2", "Bob");
        store.add_signatures("S1", vec![sig(&[1.0, 0.0])]).unwrap();
        store.enroll("CS101", "S2").unwrap();
        store.enroll("CS101", "S1").unwrap();
        store
    }

    fn record(course: &str, day: u32, hour: u32) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            course_id: course.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap(),
            present: vec![],
            absent: vec![],
            unrecognized_count: 0,
        }
    }

    #[test]
    fn test_roster_keeps_enrollment_order() {
        let roster = store().roster("CS101").unwrap();
        assert_eq!(roster, vec![RosterEntry::new("S2", "Bob"), RosterEntry::new("S1", "Alice")]);
    }

    #[test]
    fn test_unknown_course_has_empty_roster() {
        assert!(store().roster("NOPE").unwrap().is_empty());
    }

    #[test]
    fn test_enroll_is_idempotent() {
        let mut store = store();
        store.enroll("CS101", "S1").unwrap();
        assert_eq!(store.roster("CS101").unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_student_rejected() {
        let mut store = store();
        assert!(matches!(store.enroll("CS101", "S9"), Err(StoreError::UnknownStudent(_))));
        assert!(matches!(
            store.add_signatures("S9", vec![sig(&[1.0])]),
            Err(StoreError::UnknownStudent(_))
        ));
    }

    #[test]
    fn test_signature_dimension_enforced() {
        let mut store = store();
        let err = store.add_signatures("S2", vec![sig(&[1.0, 0.0, 0.0])]).unwrap_err();
        assert!(matches!(err, StoreError::Gallery(GalleryError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_signatures_skip_identities_without_references() {
        let gallery = store().signatures(&["S1".into(), "S2".into(), "S9".into()]).unwrap();
        assert_eq!(gallery.len(), 1);
        assert!(gallery.signatures("S1").is_some());
    }

    #[test]
    fn test_history_filters_and_orders() {
        let mut store = MemoryStore::new();
        store.store_attendance(record("CS101", 1, 9)).unwrap();
        store.store_attendance(record("CS101", 2, 9)).unwrap();
        store.store_attendance(record("CS101", 2, 14)).unwrap();
        store.store_attendance(record("MA200", 2, 10)).unwrap();

        let all = store.attendance_history(None, None).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let day = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        let cs = store.attendance_history(Some("CS101"), Some(day)).unwrap();
        assert_eq!(cs.len(), 2);
        assert_eq!(cs[0].timestamp.format("%H").to_string(), "14");
    }

    #[test]
    fn test_history_is_capped() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let records: Vec<AttendanceRecord> = (0..150)
            .map(|i| AttendanceRecord {
                timestamp: base + Duration::minutes(i),
                ..record("CS101", 1, 0)
            })
            .collect();
        let history = filter_history(&records, None, None);
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].timestamp, base + Duration::minutes(149));
    }

    #[test]
    fn test_serde_skips_attendance() {
        let mut store = store();
        store.store_attendance(record("CS101", 1, 9)).unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let restored: MemoryStore = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.roster("CS101").unwrap().len(), 2);
        assert_eq!(restored.student("S1").unwrap().signatures.len(), 1);
        assert!(restored.attendance_history(None, None).unwrap().is_empty());
    }
}
