//! Capabilities whose model is loaded on first use.
//!
//! Listing, adding and removing references never run a model, so a gallery
//! opened with lazy capabilities works without the ONNX files installed.
//! Version and metric are declared up front so the store can prune its cache
//! before anything is loaded.

use crate::capability::{DetectionError, Embedder, EmbeddingError, FaceDetector};
use crate::codec::RasterImage;
use crate::types::{BoundingBox, DistanceMetric, Embedding};
use std::sync::{Arc, Mutex, PoisonError};

/// Holds a loader and, once it has succeeded, its result. A failed load is
/// retried on the next call.
struct OnDemand<T: ?Sized, E> {
    loader: Box<dyn Fn() -> Result<Arc<T>, E> + Send + Sync>,
    loaded: Mutex<Option<Arc<T>>>,
}

impl<T: ?Sized, E> OnDemand<T, E> {
    fn new(loader: Box<dyn Fn() -> Result<Arc<T>, E> + Send + Sync>) -> Self {
        Self {
            loader,
            loaded: Mutex::new(None),
        }
    }

    fn get(&self) -> Result<Arc<T>, E> {
        let mut slot = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = slot.as_ref() {
            return Ok(loaded.clone());
        }
        let loaded = (self.loader)()?;
        *slot = Some(loaded.clone());
        Ok(loaded)
    }

    fn is_loaded(&self) -> bool {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

/// [`FaceDetector`] that loads its model on the first `detect`.
pub struct LazyDetector {
    version: String,
    inner: OnDemand<dyn FaceDetector, DetectionError>,
}

impl LazyDetector {
    pub fn new<F>(version: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn FaceDetector>, DetectionError> + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            inner: OnDemand::new(Box::new(loader)),
        }
    }

    /// Load now if not loaded yet.
    pub fn load(&self) -> Result<(), DetectionError> {
        let detector = self.inner.get()?;
        if detector.version() != self.version {
            return Err(DetectionError::InferenceFailed(format!(
                "loaded detector {} but {} was declared",
                detector.version(),
                self.version
            )));
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }
}

impl FaceDetector for LazyDetector {
    fn version(&self) -> &str {
        &self.version
    }

    fn detect(&self, image: &RasterImage) -> Result<Vec<BoundingBox>, DetectionError> {
        self.load()?;
        self.inner.get()?.detect(image)
    }
}

/// [`Embedder`] that loads its model on the first `embed`.
pub struct LazyEmbedder {
    version: String,
    metric: DistanceMetric,
    inner: OnDemand<dyn Embedder, EmbeddingError>,
}

impl LazyEmbedder {
    pub fn new<F>(version: impl Into<String>, metric: DistanceMetric, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Embedder>, EmbeddingError> + Send + Sync + 'static,
    {
        Self {
            version: version.into(),
            metric,
            inner: OnDemand::new(Box::new(loader)),
        }
    }

    /// Load now if not loaded yet.
    pub fn load(&self) -> Result<(), EmbeddingError> {
        let embedder = self.inner.get()?;
        if embedder.version() != self.version || embedder.metric() != self.metric {
            return Err(EmbeddingError::InferenceFailed(format!(
                "loaded embedder {} ({}) but {} ({}) was declared",
                embedder.version(),
                embedder.metric(),
                self.version,
                self.metric
            )));
        }
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.is_loaded()
    }
}

impl Embedder for LazyEmbedder {
    fn version(&self) -> &str {
        &self.version
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn embed(&self, image: &RasterImage, face: Option<&BoundingBox>) -> Result<Embedding, EmbeddingError> {
        self.load()?;
        self.inner.get()?.embed(image, face)
    }
}
