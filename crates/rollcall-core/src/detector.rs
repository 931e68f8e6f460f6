//! Multi-scale cascade face detector.
//!
//! Slides the cascade window over a grayscale pyramid of the input (the image
//! is shrunk, the window stays fixed), collects every accepted window in
//! source coordinates, and merges neighbouring hits into one region per face.

use crate::cascade::{CascadeError, CascadeModel, IntegralImage};
use crate::image_io;
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// --- Tuned defaults for the frontal-face cascade ---
const DEFAULT_SCALE_FACTOR: f64 = 1.1;
const DEFAULT_MIN_NEIGHBORS: usize = 5;
const DEFAULT_MIN_SIZE: u32 = 30;
const DEFAULT_GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade error: {0}")]
    Cascade(#[from] CascadeError),
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
    #[error("image has no pixels")]
    EmptyImage,
}

/// Pluggable face detection backend.
///
/// Result order is unspecified; callers may use it for display only.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// Search parameters for [`CascadeDetector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Pyramid step between scales. Must be greater than 1.
    pub scale_factor: f64,
    /// A merged face needs more than this many raw hits.
    pub min_neighbors: usize,
    /// Smallest face edge, in source pixels.
    pub min_size: u32,
    /// Largest face edge, in source pixels. Unbounded when absent.
    pub max_size: Option<u32>,
    /// Relative tolerance when clustering neighbouring hits.
    pub group_eps: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_SIZE,
            max_size: None,
            group_eps: DEFAULT_GROUP_EPS,
        }
    }
}

impl DetectorConfig {
    fn validate(&self) -> Result<(), DetectorError> {
        if !(self.scale_factor > 1.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "scale_factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        if !(self.group_eps >= 0.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "group_eps must be >= 0, got {}",
                self.group_eps
            )));
        }
        if let Some(max) = self.max_size {
            if max < self.min_size {
                return Err(DetectorError::InvalidConfig(format!(
                    "max_size {max} is below min_size {}",
                    self.min_size
                )));
            }
        }
        Ok(())
    }
}

/// Integer rectangle used during the search; may extend past the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rect {
    x: i64,
    y: i64,
    w: i64,
    h: i64,
}

/// Viola–Jones style detector over a boosted Haar cascade.
pub struct CascadeDetector {
    cascade: CascadeModel,
    config: DetectorConfig,
}

impl CascadeDetector {
    /// Load a JSON cascade from disk.
    pub fn load(path: &Path, config: DetectorConfig) -> Result<Self, DetectorError> {
        let cascade = CascadeModel::load(path)?;
        Self::new(cascade, config)
    }

    pub fn new(cascade: CascadeModel, config: DetectorConfig) -> Result<Self, DetectorError> {
        config.validate()?;
        Ok(Self { cascade, config })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Raw accepted windows across every pyramid level, in source coordinates.
    fn scan(&self, gray: &GrayImage) -> Vec<Rect> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = (self.cascade.window_width, self.cascade.window_height);
        let mut hits = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            let window_w = (win_w as f64 * factor).round() as u32;
            let window_h = (win_h as f64 * factor).round() as u32;

            if scaled_w < win_w || scaled_h < win_h {
                break;
            }
            if let Some(max) = self.config.max_size {
                if window_w > max || window_h > max {
                    break;
                }
            }

            if window_w >= self.config.min_size && window_h >= self.config.min_size {
                let resized;
                let level = if factor == 1.0 {
                    gray
                } else {
                    resized = imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle);
                    &resized
                };
                let integral = IntegralImage::new(level);
                let step = if factor > 2.0 { 1 } else { 2 };

                let before = hits.len();
                for y in (0..=scaled_h - win_h).step_by(step) {
                    for x in (0..=scaled_w - win_w).step_by(step) {
                        if self.cascade.accepts(&integral, x, y) {
                            hits.push(Rect {
                                x: (x as f64 * factor).round() as i64,
                                y: (y as f64 * factor).round() as i64,
                                w: window_w as i64,
                                h: window_h as i64,
                            });
                        }
                    }
                }
                tracing::trace!(factor, hits = hits.len() - before, "cascade pyramid level");
            }

            factor *= self.config.scale_factor;
        }

        hits
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<FaceRegion>, DetectorError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectorError::EmptyImage);
        }

        let gray = image_io::to_grayscale(image);
        let hits = self.scan(&gray);
        let raw_hits = hits.len();
        let grouped = group_rectangles(hits, self.config.min_neighbors, self.config.group_eps);

        let faces: Vec<FaceRegion> = grouped
            .into_iter()
            .filter_map(|r| FaceRegion::clipped(r.x, r.y, r.w, r.h, image.width(), image.height()))
            .collect();

        tracing::debug!(raw_hits, faces = faces.len(), "cascade detection complete");
        Ok(faces)
    }
}

/// Two rectangles belong to the same face when every edge is within
/// `eps × mean(min side)` of its counterpart.
fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (a.w.min(b.w) + a.h.min(b.h)) as f64 * 0.5;
    ((a.x - b.x).abs() as f64) <= delta
        && ((a.y - b.y).abs() as f64) <= delta
        && ((a.x + a.w - b.x - b.w).abs() as f64) <= delta
        && ((a.y + a.h - b.y - b.h).abs() as f64) <= delta
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Assign a cluster label to every rectangle; labels are numbered in order of
/// first appearance.
fn partition(rects: &[Rect], eps: f64) -> (Vec<usize>, usize) {
    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();

    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find_root(&mut parent, i);
                let rj = find_root(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut class_of_root = vec![usize::MAX; n];
    let mut labels = Vec::with_capacity(n);
    let mut classes = 0;
    for i in 0..n {
        let root = find_root(&mut parent, i);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = classes;
            classes += 1;
        }
        labels.push(class_of_root[root]);
    }
    (labels, classes)
}

/// Merge raw cascade hits into one rectangle per face.
///
/// Clusters need more than `min_neighbors` members; each surviving cluster
/// becomes its averaged rectangle. A weak cluster that sits inside a much
/// better-supported one is dropped. With `min_neighbors == 0` the hits are
/// returned as-is.
fn group_rectangles(rects: Vec<Rect>, min_neighbors: usize, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let (labels, classes) = partition(&rects, eps);

    let mut sums = vec![(0i64, 0i64, 0i64, 0i64); classes];
    let mut counts = vec![0usize; classes];
    for (rect, &label) in rects.iter().zip(labels.iter()) {
        let s = &mut sums[label];
        s.0 += rect.x;
        s.1 += rect.y;
        s.2 += rect.w;
        s.3 += rect.h;
        counts[label] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, &n)| {
            let k = 1.0 / n as f64;
            Rect {
                x: (s.0 as f64 * k).round() as i64,
                y: (s.1 as f64 * k).round() as i64,
                w: (s.2 as f64 * k).round() as i64,
                h: (s.3 as f64 * k).round() as i64,
            }
        })
        .collect();

    let mut kept = Vec::new();
    for i in 0..classes {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let r1 = averaged[i];

        let swallowed = (0..classes).any(|j| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let r2 = averaged[j];
            let dx = (r2.w as f64 * eps).round() as i64;
            let dy = (r2.h as f64 * eps).round() as i64;
            r1.x >= r2.x - dx
                && r1.y >= r2.y - dy
                && r1.x + r1.w <= r2.x + r2.w + dx
                && r1.y + r1.h <= r2.y + r2.h + dy
                && (n2 > n1.max(3) || n1 < 3)
        });

        if !swallowed {
            kept.push(r1);
        }
    }
    kept
}
