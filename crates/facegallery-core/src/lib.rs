//! facegallery-core: labeled face gallery and matching engine.
//!
//! Keeps a directory of labeled reference photos, embeds them through a
//! pluggable [`Embedder`] with a versioned cache, and ranks them against
//! query faces. SCRFD detection and ArcFace embedding adapters run via
//! ONNX Runtime.

pub mod alignment;
pub mod cache;
pub mod capability;
pub mod codec;
pub mod config;
pub mod detector;
pub mod label;
pub mod lazy;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod service;
pub mod store;
pub mod types;

pub use cache::EmbeddingCache;
pub use capability::{Embedder, FaceDetector};
pub use codec::RasterImage;
pub use config::{default_model_dir, Config};
pub use label::Label;
pub use matcher::{EmbeddingIndex, ExhaustiveMatcher, MatchOptions, Matcher};
pub use service::{respond, GalleryService, ModelLoading, ServiceReply};
pub use store::GalleryStore;
pub use types::{BoundingBox, DistanceMetric, Embedding, FaceBox, MatchResult, ReferenceId, ReferenceImage};
