//! Per-request signature gallery.
//!
//! Built fresh from the enrollment store for every matching request and then
//! only read. Identities keep their insertion order, which is the order the
//! matcher scans them in.

use crate::types::{RosterEntry, Signature};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GalleryError {
    #[error("signature for {identity_id} has {actual} dimensions, gallery uses {expected}")]
    DimensionMismatch {
        identity_id: String,
        expected: usize,
        actual: usize,
    },
}

/// Reference signatures for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity_id: String,
    pub signatures: Vec<Signature>,
}

/// Mapping of identity → reference signatures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    dimension: Option<usize>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gallery from `(identity, signatures)` pairs.
    ///
    /// Identities with no signatures are skipped: they could never match.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, GalleryError>
    where
        I: IntoIterator<Item = (S, Vec<Signature>)>,
        S: Into<String>,
    {
        let mut gallery = Self::new();
        for (identity_id, signatures) in entries {
            gallery.insert(identity_id, signatures)?;
        }
        Ok(gallery)
    }

    /// Add reference signatures for an identity, appending if it is already present.
    pub fn insert(
        &mut self,
        identity_id: impl Into<String>,
        signatures: Vec<Signature>,
    ) -> Result<(), GalleryError> {
        let identity_id = identity_id.into();
        if signatures.is_empty() {
            return Ok(());
        }

        let expected = self.dimension.unwrap_or(signatures[0].dimension());
        if let Some(bad) = signatures.iter().find(|s| s.dimension() != expected) {
            return Err(GalleryError::DimensionMismatch {
                identity_id,
                expected,
                actual: bad.dimension(),
            });
        }
        self.dimension = Some(expected);

        match self.entries.iter_mut().find(|e| e.identity_id == identity_id) {
            Some(entry) => entry.signatures.extend(signatures),
            None => self.entries.push(GalleryEntry {
                identity_id,
                signatures,
            }),
        }
        Ok(())
    }

    /// Copy of this gallery limited to identities on the roster.
    pub fn restrict_to(&self, roster: &[RosterEntry]) -> Gallery {
        let allowed: HashSet<&str> = roster.iter().map(|r| r.identity_id.as_str()).collect();
        let entries: Vec<GalleryEntry> = self
            .entries
            .iter()
            .filter(|e| allowed.contains(e.identity_id.as_str()))
            .cloned()
            .collect();
        let dimension = if entries.is_empty() { None } else { self.dimension };
        Gallery { entries, dimension }
    }

    /// Every `(identity, reference signature)` pair in scan order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &Signature)> {
        self.entries.iter().flat_map(|e| {
            e.signatures
                .iter()
                .map(move |s| (e.identity_id.as_str(), s))
        })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn signatures(&self, identity_id: &str) -> Option<&[Signature]> {
        self.entries
            .iter()
            .find(|e| e.identity_id == identity_id)
            .map(|e| e.signatures.as_slice())
    }

    /// Signature dimensionality shared by every entry, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn signature_count(&self) -> usize {
        self.entries.iter().map(|e| e.signatures.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(values: &[f32]) -> Signature {
        Signature::from_raw(values.to_vec()).unwrap()
    }

    #[test]
    fn test_insert_preserves_order_and_appends() {
        let mut g = Gallery::new();
        g.insert("S2", vec![sig(&[1.0, 0.0])]).unwrap();
        g.insert("S1", vec![sig(&[0.0, 1.0])]).unwrap();
        g.insert("S2", vec![sig(&[1.0, 1.0])]).unwrap();

        let ids: Vec<&str> = g.entries().iter().map(|e| e.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S1"]);
        assert_eq!(g.signatures("S2").map(|s| s.len()), Some(2));
        assert_eq!(g.signature_count(), 3);

        let pair_ids: Vec<&str> = g.pairs().map(|(id, _)| id).collect();
        assert_eq!(pair_ids, vec!["S2", "S2", "S1"]);
    }

    #[test]
    fn test_empty_signature_lists_are_skipped() {
        let g = Gallery::from_entries(vec![("S1", vec![]), ("S2", vec![sig(&[1.0])])]).unwrap();
        assert_eq!(g.len(), 1);
        assert!(g.signatures("S1").is_none());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = Gallery::from_entries(vec![
            ("S1", vec![sig(&[1.0, 0.0])]),
            ("S2", vec![sig(&[1.0, 0.0, 0.0])]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            GalleryError::DimensionMismatch {
                identity_id: "S2".into(),
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn test_restrict_to_roster() {
        let g = Gallery::from_entries(vec![
            ("S1", vec![sig(&[1.0, 0.0])]),
            ("S2", vec![sig(&[0.0, 1.0])]),
            ("S3", vec![sig(&[1.0, 1.0])]),
        ])
        .unwrap();

        let roster = vec![RosterEntry::new("S3", "Cara"), RosterEntry::new("S1", "Alice")];
        let restricted = g.restrict_to(&roster);
        let ids: Vec<&str> = restricted.entries().iter().map(|e| e.identity_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S3"]);
        assert_eq!(restricted.dimension(), Some(2));

        let none = g.restrict_to(&[]);
        assert!(none.is_empty());
        assert_eq!(none.dimension(), None);
        // Source gallery is untouched.
        assert_eq!(g.len(), 3);
    }
}
