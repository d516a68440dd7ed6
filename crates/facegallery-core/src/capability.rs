//! Capability interfaces for the external face models.
//!
//! The gallery engine never looks inside a model: it asks a [`FaceDetector`]
//! for boxes and an [`Embedder`] for vectors. Both carry a version tag so
//! cached embeddings can be invalidated when a model changes.

use crate::codec::RasterImage;
use crate::types::{BoundingBox, DistanceMetric, Embedding};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("model file not found: {0}; download it from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("model file not found: {0}; download it from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Finds face regions in an image. Pure function of (image, parameters).
pub trait FaceDetector: Send + Sync {
    /// Capability version tag, e.g. `"scrfd-det_10g"`.
    fn version(&self) -> &str;

    /// Detect faces, most confident first. No faces is `Ok(vec![])`.
    fn detect(&self, image: &RasterImage) -> Result<Vec<BoundingBox>, DetectionError>;
}

/// Turns an image into a fixed-length feature vector.
pub trait Embedder: Send + Sync {
    /// Capability version tag. Embeddings from different versions are never compared.
    fn version(&self) -> &str;

    /// The metric this embedder's vectors must be compared with.
    fn metric(&self) -> DistanceMetric;

    /// Embed `image`, restricted to `face` when one is given.
    fn embed(
        &self,
        image: &RasterImage,
        face: Option<&BoundingBox>,
    ) -> Result<Embedding, EmbeddingError>;
}
