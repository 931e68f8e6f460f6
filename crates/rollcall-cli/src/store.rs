//! File-backed store: `enrollment.json` holds students, signatures and
//! course rosters; `attendance.jsonl` holds one attendance record per line.

use chrono::NaiveDate;
use rollcall_core::gallery::Gallery;
use rollcall_core::store::{filter_history, StoreError};
use rollcall_core::{AttendanceRecord, AttendanceStore, EnrollmentStore, MemoryStore, Roster};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub struct JsonStore {
    enrollment_path: PathBuf,
    attendance_path: PathBuf,
    enrollment: MemoryStore,
}

impl JsonStore {
    /// Open the store, starting empty if the enrollment file does not exist yet.
    pub fn open(enrollment_path: &Path, attendance_path: &Path) -> Result<Self, StoreError> {
        let enrollment = if enrollment_path.exists() {
            let text = fs::read_to_string(enrollment_path)?;
            serde_json::from_str(&text)?
        } else {
            MemoryStore::new()
        };

        tracing::debug!(
            path = %enrollment_path.display(),
            students = enrollment.student_count(),
            "opened enrollment store"
        );

        Ok(Self {
            enrollment_path: enrollment_path.to_path_buf(),
            attendance_path: attendance_path.to_path_buf(),
            enrollment,
        })
    }

    pub fn enrollment(&self) -> &MemoryStore {
        &self.enrollment
    }

    pub fn enrollment_mut(&mut self) -> &mut MemoryStore {
        &mut self.enrollment
    }

    /// Write the enrollment file. Goes through a temporary file so a crash
    /// never leaves a truncated store behind.
    pub fn save(&self) -> Result<(), StoreError> {
        ensure_parent(&self.enrollment_path)?;
        let tmp = self.enrollment_path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.enrollment)?)?;
        fs::rename(&tmp, &self.enrollment_path)?;
        tracing::debug!(path = %self.enrollment_path.display(), "saved enrollment store");
        Ok(())
    }

    fn read_attendance(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        if !self.attendance_path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(&self.attendance_path)?);
        let mut records = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(line = n + 1, error = %e, "skipping malformed attendance record"),
            }
        }
        Ok(records)
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

impl EnrollmentStore for JsonStore {
    fn roster(&self, course_id: &str) -> Result<Roster, StoreError> {
        self.enrollment.roster(course_id)
    }

    fn signatures(&self, identity_ids: &[String]) -> Result<Gallery, StoreError> {
        self.enrollment.signatures(identity_ids)
    }
}

impl AttendanceStore for JsonStore {
    fn store_attendance(&mut self, record: AttendanceRecord) -> Result<(), StoreError> {
        ensure_parent(&self.attendance_path)?;
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.attendance_path)?;
        file.write_all(&line)?;
        Ok(())
    }

    fn attendance_history(
        &self,
        course_id: Option<&str>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, StoreError> {
        let records = self.read_attendance()?;
        Ok(filter_history(&records, course_id, date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rollcall_core::{RosterEntry, Signature};
    use uuid::Uuid;

    fn open(dir: &Path) -> JsonStore {
        JsonStore::open(&dir.join("enrollment.json"), &dir.join("attendance.jsonl")).unwrap()
    }

    fn record(course: &str, hour: u32) -> AttendanceRecord {
        AttendanceRecord {
            id: Uuid::new_v4(),
            course_id: course.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 6, hour, 0, 0).unwrap(),
            present: vec!["S1".into()],
            absent: vec!["S2".into()],
            unrecognized_count: 1,
        }
    }

    #[test]
    fn test_enrollment_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        store.enrollment_mut().add_student("S1", "Alice");
        store
            .enrollment_mut()
            .add_signatures("S1", vec![Signature::from_raw(vec![0.0, 2.0]).unwrap()])
            .unwrap();
        store.enrollment_mut().enroll("CS101", "S1").unwrap();
        store.save().unwrap();

        let reopened = open(dir.path());
        assert_eq!(reopened.roster("CS101").unwrap(), vec![RosterEntry::new("S1", "Alice")]);
        let gallery = reopened.signatures(&["S1".into()]).unwrap();
        assert_eq!(gallery.signature_count(), 1);
        assert!(!dir.path().join("enrollment.json.tmp").exists());
    }

    #[test]
    fn test_attendance_appends_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        assert!(store.attendance_history(None, None).unwrap().is_empty());

        store.store_attendance(record("CS101", 9)).unwrap();
        store.store_attendance(record("MA200", 10)).unwrap();
        store.store_attendance(record("CS101", 11)).unwrap();

        let reopened = open(dir.path());
        let cs = reopened.attendance_history(Some("CS101"), None).unwrap();
        assert_eq!(cs.len(), 2);
        assert!(cs[0].timestamp > cs[1].timestamp);
        assert_eq!(cs[0].unrecognized_count, 1);

        let other_day = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();
        assert!(reopened.attendance_history(None, Some(other_day)).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open(dir.path());
        store.store_attendance(record("CS101", 9)).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("attendance.jsonl"))
            .unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();

        assert_eq!(store.attendance_history(None, None).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_enrollment_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("enrollment.json"), "[").unwrap();
        let err = JsonStore::open(
            &dir.path().join("enrollment.json"),
            &dir.path().join("attendance.jsonl"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
