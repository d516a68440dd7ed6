//! Deterministic capabilities and image fixtures shared by the integration tests.

#![allow(dead_code)]

use facegallery_core::capability::{DetectionError, EmbeddingError};
use facegallery_core::codec;
use facegallery_core::types::l2_normalized;
use facegallery_core::{
    BoundingBox, DistanceMetric, Embedder, Embedding, EmbeddingCache, FaceDetector, GalleryStore,
    RasterImage,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Embeds an 8×8 grayscale thumbnail, mean-centred and L2-normalized.
///
/// Identical images embed identically; images whose brightness varies along
/// different axes are orthogonal.
pub struct ThumbnailEmbedder {
    version: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl ThumbnailEmbedder {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every `embed` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Decode and embed a query image.
    pub fn embed_bytes(&self, bytes: &[u8]) -> Embedding {
        let image = codec::decode(bytes).expect("decode query");
        self.embed(&image, None).expect("embed query")
    }
}

impl Embedder for ThumbnailEmbedder {
    fn version(&self) -> &str {
        &self.version
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }

    fn embed(&self, image: &RasterImage, _face: Option<&BoundingBox>) -> Result<Embedding, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let thumbnail = image.resize_exact(8, 8);
        let gray: Vec<f32> = thumbnail
            .pixels()
            .map(|p| p.0.iter().map(|&c| c as f32).sum::<f32>() / 3.0)
            .collect();
        let mean = gray.iter().sum::<f32>() / gray.len() as f32;
        let centred: Vec<f32> = gray.iter().map(|v| v - mean).collect();

        Ok(Embedding::new(l2_normalized(&centred), self.version.clone()))
    }
}

/// Returns the same boxes for every image and counts its calls.
pub struct FixedDetector {
    boxes: Vec<BoundingBox>,
    calls: AtomicUsize,
}

impl FixedDetector {
    pub fn new(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceDetector for FixedDetector {
    fn version(&self) -> &str {
        "fixed"
    }

    fn detect(&self, _image: &RasterImage) -> Result<Vec<BoundingBox>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.boxes.clone())
    }
}

pub fn face(x: f32, y: f32, width: f32, height: f32) -> BoundingBox {
    BoundingBox {
        x,
        y,
        width,
        height,
        confidence: 0.9,
        landmarks: None,
    }
}

fn encode(image: RgbImage, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, format).expect("encode test image");
    bytes.into_inner()
}

/// Brightness rising left to right.
pub fn horizontal_gradient() -> Vec<u8> {
    encode(
        RgbImage::from_fn(32, 32, |x, _| {
            let v = (x * 8) as u8;
            Rgb([v, v, v])
        }),
        ImageFormat::Png,
    )
}

/// Brightness rising top to bottom; orthogonal to [`horizontal_gradient`].
pub fn vertical_gradient() -> Vec<u8> {
    encode(
        RgbImage::from_fn(32, 32, |_, y| {
            let v = (y * 8) as u8;
            Rgb([v, v, v])
        }),
        ImageFormat::Png,
    )
}

/// Diagonal stripes, encoded as JPEG.
pub fn stripes_jpeg() -> Vec<u8> {
    encode(
        RgbImage::from_fn(32, 32, |x, y| {
            let v = if (x + y) % 8 < 4 { 30 } else { 220 };
            Rgb([v, v, v])
        }),
        ImageFormat::Jpeg,
    )
}

pub fn open_store(root: &Path, embedder: Arc<ThumbnailEmbedder>) -> GalleryStore {
    GalleryStore::open(root, embedder, EmbeddingCache::in_memory().expect("in-memory cache"))
        .expect("open gallery")
}

pub fn open_persistent_store(root: &Path, embedder: Arc<ThumbnailEmbedder>) -> GalleryStore {
    let cache = EmbeddingCache::open(&root.join(facegallery_core::store::CACHE_FILE_NAME))
        .expect("open cache");
    GalleryStore::open(root, embedder, cache).expect("open gallery")
}
