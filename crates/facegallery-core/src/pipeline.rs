//! Detect-then-embed pipeline used for both gallery references and queries.

use crate::capability::{Embedder, EmbeddingError, FaceDetector};
use crate::codec::RasterImage;
use crate::types::{BoundingBox, DistanceMetric, Embedding};
use std::sync::Arc;

/// [`Embedder`] that locates the most confident face before embedding.
///
/// When no face is found and `enforce_detection` is off, the whole image is
/// embedded instead. Whole-image embeddings are noticeably less accurate
/// than aligned face crops.
pub struct DetectingEmbedder {
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn Embedder>,
    enforce_detection: bool,
    version: String,
}

impl DetectingEmbedder {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn Embedder>,
        enforce_detection: bool,
    ) -> Self {
        let version = pipeline_version(detector.version(), embedder.version());
        Self {
            detector,
            embedder,
            enforce_detection,
            version,
        }
    }

    /// Tag an embedding with the combined pipeline version.
    fn relabel(&self, mut embedding: Embedding) -> Embedding {
        embedding.model_version = Some(self.version.clone());
        embedding
    }
}

/// Version tag of a [`DetectingEmbedder`] built from the given capabilities.
pub fn pipeline_version(detector: &str, embedder: &str) -> String {
    format!("{detector}+{embedder}")
}

impl Embedder for DetectingEmbedder {
    fn version(&self) -> &str {
        &self.version
    }

    fn metric(&self) -> DistanceMetric {
        self.embedder.metric()
    }

    fn embed(
        &self,
        image: &RasterImage,
        face: Option<&BoundingBox>,
    ) -> Result<Embedding, EmbeddingError> {
        if face.is_some() {
            return Ok(self.relabel(self.embedder.embed(image, face)?));
        }

        let faces = self.detector.detect(image)?;
        let best = faces
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));

        match best {
            Some(face) => {
                tracing::debug!(confidence = face.confidence, faces = faces.len(), "embedding best face");
                Ok(self.relabel(self.embedder.embed(image, Some(face))?))
            }
            None if self.enforce_detection => Err(EmbeddingError::NoFaceDetected),
            None => {
                tracing::debug!(
                    width = image.width(),
                    height = image.height(),
                    "no face detected; embedding whole image"
                );
                Ok(self.relabel(self.embedder.embed(image, None)?))
            }
        }
    }
}
