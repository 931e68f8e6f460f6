//! Face signature extraction via ONNX Runtime.
//!
//! Crops are resized to the model's square input, channel-ordered and
//! normalized as the model expects, run as a batch of one, and the output
//! vector is L2-normalized into a [`Signature`].

use crate::types::Signature;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

// --- FaceNet defaults ---
const FACENET_INPUT_SIZE: u32 = 160;
const DEFAULT_INTRA_THREADS: usize = 2;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("invalid face crop: {0}")]
    InvalidCrop(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {expected}-dim signature, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

impl EmbedError {
    /// Model-scope failures abort the whole request; anything else only
    /// affects the face being embedded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EmbedError::ModelNotFound(_) | EmbedError::ModelUnavailable(_))
    }
}

/// Maps a face crop to a unit-length signature.
///
/// Implementations hold no per-request state and are shared across requests.
pub trait Embedder: Send + Sync {
    fn embed(&self, face: &RgbImage) -> Result<Signature, EmbedError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `[1, size, size, 3]`, Keras-style exports.
    Nhwc,
    /// `[1, 3, size, size]`, PyTorch-style exports.
    Nchw,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Normalization {
    /// Per-image whitening: subtract the crop mean, divide by its standard
    /// deviation (floored at `1/sqrt(n)`).
    Standardize,
    /// Fixed affine normalization, e.g. 127.5 / 127.5 for ArcFace.
    MeanStd { mean: f32, std: f32 },
}

/// Embedding model input contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub input_size: u32,
    pub channel_order: ChannelOrder,
    pub layout: TensorLayout,
    pub normalization: Normalization,
    pub intra_threads: usize,
    /// Reject model outputs of any other length.
    pub expected_dimension: Option<usize>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            input_size: FACENET_INPUT_SIZE,
            channel_order: ChannelOrder::Rgb,
            layout: TensorLayout::Nhwc,
            normalization: Normalization::Standardize,
            intra_threads: DEFAULT_INTRA_THREADS,
            expected_dimension: None,
        }
    }
}

/// ONNX-backed embedder.
///
/// The session is loaded once and shared. `Session::run` needs exclusive
/// access, so invocations are serialized behind a mutex.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    config: EmbedderConfig,
}

impl OnnxEmbedder {
    /// Load the embedding model. Any failure here is fatal for the process.
    pub fn load(model_path: &Path, config: EmbedderConfig) -> Result<Self, EmbedError> {
        if !model_path.exists() {
            return Err(EmbedError::ModelNotFound(model_path.display().to_string()));
        }

        let session = open_session(model_path, config.intra_threads).map_err(|e| {
            EmbedError::ModelUnavailable(format!("{}: {e}", model_path.display()))
        })?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            input_size = config.input_size,
            layout = ?config.layout,
            "loaded embedding model"
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }
}

fn open_session(model_path: &Path, intra_threads: usize) -> Result<Session, ort::Error> {
    Ok(Session::builder()?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?)
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, face: &RgbImage) -> Result<Signature, EmbedError> {
        if face.width() == 0 || face.height() == 0 {
            return Err(EmbedError::InvalidCrop(format!(
                "{}x{} crop",
                face.width(),
                face.height()
            )));
        }

        let input = preprocess(face, &self.config);

        let mut session = self
            .session
            .lock()
            .map_err(|_| EmbedError::ModelUnavailable("embedding session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedError::InferenceFailed(format!("embedding extraction: {e}")))?;
        let raw: Vec<f32> = raw_data.to_vec();

        if let Some(expected) = self.config.expected_dimension {
            if raw.len() != expected {
                return Err(EmbedError::DimensionMismatch {
                    expected,
                    actual: raw.len(),
                });
            }
        }

        Signature::from_raw(raw).map_err(|e| EmbedError::InferenceFailed(e.to_string()))
    }
}

/// Resize, reorder and normalize a crop into a single-element input batch.
fn preprocess(face: &RgbImage, config: &EmbedderConfig) -> Array4<f32> {
    let size = config.input_size;
    let resized = imageops::resize(face, size, size, FilterType::Triangle);
    let n = size as usize;

    let (offset, scale) = match config.normalization {
        Normalization::Standardize => {
            let count = (n * n * 3) as f32;
            let mean = resized.as_raw().iter().map(|&v| v as f32).sum::<f32>() / count;
            let variance = resized
                .as_raw()
                .iter()
                .map(|&v| (v as f32 - mean).powi(2))
                .sum::<f32>()
                / count;
            let std = variance.sqrt().max(1.0 / count.sqrt());
            (mean, std)
        }
        Normalization::MeanStd { mean, std } => (mean, std),
    };

    let shape = match config.layout {
        TensorLayout::Nhwc => (1, n, n, 3),
        TensorLayout::Nchw => (1, 3, n, n),
    };
    let mut tensor = Array4::<f32>::zeros(shape);

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let source = match config.channel_order {
                ChannelOrder::Rgb => c,
                ChannelOrder::Bgr => 2 - c,
            };
            let value = (pixel[source] as f32 - offset) / scale;
            match config.layout {
                TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
            }
        }
    }

    tensor
}
