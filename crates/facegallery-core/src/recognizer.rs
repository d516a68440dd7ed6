//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional, L2-normalized face embeddings using the
//! w600k_r50 ArcFace model. Faces with landmarks are aligned first; a bare
//! box is cropped and resized; with neither, the whole image is used.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::capability::{Embedder, EmbeddingError};
use crate::codec::RasterImage;
use crate::types::{l2_normalized, BoundingBox, DistanceMetric, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;

const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // not 128.0; ArcFace normalizes symmetrically
const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_VERSION: &str = "arcface-w600k_r50";

/// ArcFace-based face embedder.
pub struct ArcFaceRecognizer {
    session: Mutex<Session>,
}

impl ArcFaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EmbeddingError> {
        if !model_path.exists() {
            return Err(EmbeddingError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Produce the 112×112 RGB crop the network consumes.
    fn face_crop(image: &RasterImage, face: Option<&BoundingBox>) -> RgbImage {
        let size = ALIGNED_SIZE as u32;
        match face {
            Some(BoundingBox { landmarks: Some(landmarks), .. }) => {
                alignment::align_face(image, landmarks)
            }
            Some(face) => {
                let region = face.to_face_box(image.width(), image.height());
                if region.is_empty() {
                    image.resize_exact(size, size)
                } else {
                    image.crop(&region).resize_exact(size, size)
                }
            }
            None => image.resize_exact(size, size),
        }
    }

    /// Convert a 112×112 RGB crop into a NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = ALIGNED_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in crop.enumerate_pixels() {
            if x as usize >= size || y as usize >= size {
                continue;
            }
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        tensor
    }
}

impl Embedder for ArcFaceRecognizer {
    fn version(&self) -> &str {
        ARCFACE_VERSION
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }

    fn embed(
        &self,
        image: &RasterImage,
        face: Option<&BoundingBox>,
    ) -> Result<Embedding, EmbeddingError> {
        let input = Self::preprocess(&Self::face_crop(image, face));

        let mut session = self
            .session
            .lock()
            .map_err(|e| EmbeddingError::InferenceFailed(format!("session lock poisoned: {e}")))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(EmbeddingError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(l2_normalized(raw), ARCFACE_VERSION))
    }
}
