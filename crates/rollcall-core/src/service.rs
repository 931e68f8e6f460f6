//! Attendance processing over an enrollment store.
//!
//! Fetches the course roster and the roster's signatures, reconciles the
//! photo and encodes the result. Once the embedding model has failed, the
//! service refuses further recognition requests instead of degrading.

use crate::image_io::EncodeError;
use crate::reconciler::{AttendanceOutcome, ReconcileError, Reconciler};
use crate::report::AttendanceReport;
use crate::store::{AttendanceStore, EnrollmentStore, StoreError};
use crate::types::AttendanceRecord;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("failed to encode report: {0}")]
    Encode(#[from] EncodeError),
    #[error("embedding model unavailable; recognition disabled until restart")]
    ModelUnavailable,
}

pub struct AttendanceService<S> {
    store: S,
    reconciler: Reconciler,
    similarity_threshold: f32,
    model_failed: AtomicBool,
}

impl<S: EnrollmentStore> AttendanceService<S> {
    pub fn new(store: S, reconciler: Reconciler, similarity_threshold: f32) -> Self {
        Self {
            store,
            reconciler,
            similarity_threshold,
            model_failed: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// False once the embedding model has reported itself unavailable.
    pub fn is_available(&self) -> bool {
        !self.model_failed.load(Ordering::Acquire)
    }

    /// Reconcile a photo against the course roster.
    pub fn reconcile(&self, course_id: &str, image: &[u8]) -> Result<AttendanceOutcome, ServiceError> {
        if !self.is_available() {
            return Err(ServiceError::ModelUnavailable);
        }

        let roster = self.store.roster(course_id)?;
        let ids: Vec<String> = roster.iter().map(|r| r.identity_id.clone()).collect();
        let gallery = self.store.signatures(&ids)?;

        tracing::info!(
            course = course_id,
            students = roster.len(),
            signatures = gallery.signature_count(),
            "processing attendance"
        );

        match self
            .reconciler
            .reconcile_bytes(image, &roster, &gallery, self.similarity_threshold)
        {
            Err(ReconcileError::ModelUnavailable(e)) => {
                self.model_failed.store(true, Ordering::Release);
                Err(ReconcileError::ModelUnavailable(e).into())
            }
            other => Ok(other?),
        }
    }

    /// Reconcile a photo and encode the result for transport.
    pub fn process(&self, course_id: &str, image: &[u8]) -> Result<AttendanceReport, ServiceError> {
        let outcome = self.reconcile(course_id, image)?;
        Ok(AttendanceReport::from_outcome(course_id, Utc::now(), &outcome)?)
    }
}

impl<S: EnrollmentStore + AttendanceStore> AttendanceService<S> {
    /// Persist a confirmed attendance record.
    pub fn submit(&mut self, record: AttendanceRecord) -> Result<(), ServiceError> {
        tracing::info!(
            course = %record.course_id,
            present = record.present.len(),
            absent = record.absent.len(),
            "attendance submitted"
        );
        self.store.store_attendance(record)?;
        Ok(())
    }
}
