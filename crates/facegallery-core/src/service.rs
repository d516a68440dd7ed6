//! Request-level facade over the codec, capabilities, store and matcher.
//!
//! Every operation returns a serializable payload or a [`ServiceError`];
//! [`respond`] turns either into the `{status, body}` reply the transports
//! send back.

use crate::cache::{CacheError, EmbeddingCache};
use crate::capability::{DetectionError, Embedder, EmbeddingError, FaceDetector};
use crate::codec::{self, CodecError};
use crate::config::Config;
use crate::detector::{ScrfdDetector, SCRFD_VERSION};
use crate::lazy::{LazyDetector, LazyEmbedder};
use crate::label::{Label, LabelError};
use crate::matcher::{ExhaustiveMatcher, MatchError, MatchOptions, Matcher};
use crate::pipeline::{pipeline_version, DetectingEmbedder};
use crate::recognizer::{ArcFaceRecognizer, ARCFACE_VERSION};
use crate::store::{GalleryStore, StoreError};
use crate::types::{DistanceMetric, FaceBox, LabelSummary, ReferenceId};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL: u16 = 500;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    InvalidImage(#[from] CodecError),
    #[error("invalid label: {0}")]
    InvalidLabel(#[from] LabelError),
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectionError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
    #[error("embedding cache: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub faces: Vec<FaceBox>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct MatchView {
    /// Path of the matched reference image.
    pub identity: String,
    pub label: Label,
    pub distance: f32,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub matches: Vec<MatchView>,
}

#[derive(Debug, Serialize)]
pub struct AddFaceResponse {
    pub status: &'static str,
    pub id: ReferenceId,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct GalleryResponse {
    pub gallery: Vec<LabelSummary>,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub status: &'static str,
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub gallery_dir: String,
    pub detector: String,
    pub embedder: String,
    pub metric: DistanceMetric,
    pub labels: usize,
    pub references: usize,
    pub cached_embeddings: usize,
}

/// Transport-neutral reply: an HTTP-style status and a JSON body.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReply {
    pub status: u16,
    pub body: Value,
}

impl ServiceReply {
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: json!({ "error": message.into() }),
        }
    }
}

/// Wrap an operation result for the wire. Errors become status 400 with
/// `{"error": message}`.
pub fn respond<T: Serialize>(result: Result<T, ServiceError>) -> ServiceReply {
    match result {
        Ok(payload) => match serde_json::to_value(payload) {
            Ok(body) => ServiceReply { status: STATUS_OK, body },
            Err(e) => ServiceReply::error(STATUS_INTERNAL, format!("serializing response: {e}")),
        },
        Err(e) => {
            tracing::info!(error = %e, "request failed");
            ServiceReply::error(STATUS_BAD_REQUEST, e.to_string())
        }
    }
}

/// When [`GalleryService::from_config`] reads the ONNX models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLoading {
    /// Load both models up front and fail if either is missing.
    Eager,
    /// Load each model on first use.
    Lazy,
}

pub struct GalleryService {
    detector: Arc<dyn FaceDetector>,
    store: Arc<GalleryStore>,
    matcher: ExhaustiveMatcher,
    options: MatchOptions,
}

impl GalleryService {
    /// The embedder used for queries is the store's, so query and gallery
    /// embeddings always share a version.
    pub fn new(detector: Arc<dyn FaceDetector>, store: Arc<GalleryStore>, options: MatchOptions) -> Self {
        Self {
            detector,
            store,
            matcher: ExhaustiveMatcher,
            options,
        }
    }

    /// Open the gallery described by `config` with the SCRFD detector and
    /// ArcFace embedder. With [`ModelLoading::Lazy`] the ONNX models are read
    /// on the first detect or embed, so gallery file operations work without
    /// them.
    pub fn from_config(config: &Config, loading: ModelLoading) -> Result<Self, ServiceError> {
        let scrfd_path = config.scrfd_model_path();
        let params = config.detector_params();
        let detector = Arc::new(LazyDetector::new(SCRFD_VERSION, move || {
            Ok(Arc::new(ScrfdDetector::load(&scrfd_path, params)?) as Arc<dyn FaceDetector>)
        }));

        let arcface_path = config.arcface_model_path();
        let enforce_detection = config.enforce_detection;
        let pipeline_detector: Arc<dyn FaceDetector> = detector.clone();
        let embedder = Arc::new(LazyEmbedder::new(
            pipeline_version(SCRFD_VERSION, ARCFACE_VERSION),
            DistanceMetric::Cosine,
            move || {
                let recognizer = Arc::new(ArcFaceRecognizer::load(&arcface_path)?);
                Ok(Arc::new(DetectingEmbedder::new(
                    pipeline_detector.clone(),
                    recognizer,
                    enforce_detection,
                )) as Arc<dyn Embedder>)
            },
        ));

        if loading == ModelLoading::Eager {
            detector.load()?;
            embedder.load()?;
        }

        let cache = match config.cache_file() {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(StoreError::from)?;
                }
                EmbeddingCache::open(&path)?
            }
            None => EmbeddingCache::in_memory()?,
        };
        let store = GalleryStore::open(&config.gallery_dir, embedder, cache)?;

        tracing::info!(?loading, "gallery service ready");
        Ok(Self::new(detector, Arc::new(store), config.match_options()))
    }

    pub fn store(&self) -> &Arc<GalleryStore> {
        &self.store
    }

    pub fn options(&self) -> &MatchOptions {
        &self.options
    }

    /// Face boxes in an uploaded image.
    pub fn detect(&self, image_bytes: &[u8]) -> Result<DetectResponse, ServiceError> {
        let image = codec::decode(image_bytes)?;
        let faces: Vec<FaceBox> = self
            .detector
            .detect(&image)?
            .iter()
            .map(|b| b.to_face_box(image.width(), image.height()))
            .filter(|f| !f.is_empty())
            .collect();

        tracing::info!(faces = faces.len(), "detect");
        Ok(DetectResponse {
            count: faces.len(),
            faces,
        })
    }

    /// Gallery references matching the face in an uploaded image.
    pub fn recognize(&self, image_bytes: &[u8]) -> Result<RecognizeResponse, ServiceError> {
        self.recognize_with(image_bytes, &self.options)
    }

    pub fn recognize_with(
        &self,
        image_bytes: &[u8],
        options: &MatchOptions,
    ) -> Result<RecognizeResponse, ServiceError> {
        let image = codec::decode(image_bytes)?;
        let query = self.store.embedder().embed(&image, None)?;
        let index = self.store.embedding_index()?;
        let results = self.matcher.find_matches(&query, &index, options)?;

        tracing::info!(
            candidates = index.len(),
            skipped = index.skipped(),
            matches = results.len(),
            best = results.first().map(|m| m.distance),
            "recognize"
        );

        let matches = results
            .into_iter()
            .map(|m| MatchView {
                identity: self.store.path_of(&m.reference_id).display().to_string(),
                label: m.label,
                distance: m.distance,
            })
            .collect();
        Ok(RecognizeResponse { matches })
    }

    /// Add an uploaded image to the gallery under `label`.
    pub fn add_face(&self, image_bytes: &[u8], label: &str) -> Result<AddFaceResponse, ServiceError> {
        let reference = self.store.add_reference(label, image_bytes)?;
        Ok(AddFaceResponse {
            status: "ok",
            path: reference.path.display().to_string(),
            id: reference.id,
        })
    }

    pub fn gallery(&self) -> Result<GalleryResponse, ServiceError> {
        Ok(GalleryResponse {
            gallery: self.store.list_labels()?,
        })
    }

    pub fn remove_reference(&self, id: &str) -> Result<RemoveResponse, ServiceError> {
        let id = ReferenceId::parse(id)?;
        self.store.remove_reference(&id)?;
        Ok(RemoveResponse { status: "ok", removed: 1 })
    }

    pub fn remove_label(&self, label: &str) -> Result<RemoveResponse, ServiceError> {
        let label = Label::parse(label)?;
        let removed = self.store.remove_label(&label)?;
        Ok(RemoveResponse { status: "ok", removed })
    }

    pub fn status(&self) -> Result<StatusResponse, ServiceError> {
        let labels = self.store.list_labels()?;
        Ok(StatusResponse {
            version: env!("CARGO_PKG_VERSION"),
            gallery_dir: self.store.root().display().to_string(),
            detector: self.detector.version().to_string(),
            embedder: self.store.embedder().version().to_string(),
            metric: self.store.embedder().metric(),
            references: labels.iter().map(|l| l.count).sum(),
            labels: labels.len(),
            cached_embeddings: self.store.cached_embeddings(),
        })
    }
}
