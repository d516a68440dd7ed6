use crate::label::{Label, LabelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in source-image pixels and may extend past the image
/// edges; use [`BoundingBox::to_face_box`] for a clamped integer box.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Clamp this box to an image of `width` × `height` and round outward
    /// to whole pixels.
    pub fn to_face_box(&self, width: u32, height: u32) -> FaceBox {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                v.clamp(0.0, max as f32) as u32
            }
        };

        let x1 = clamp(self.x.floor(), width);
        let y1 = clamp(self.y.floor(), height);
        let x2 = clamp((self.x + self.width).ceil(), width);
        let y2 = clamp((self.y + self.height).ceil(), height);

        FaceBox {
            x: x1,
            y: y1,
            w: x2.saturating_sub(x1),
            h: y2.saturating_sub(y1),
        }
    }
}

/// Integer face rectangle in pixel coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl FaceBox {
    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }
}

/// Distance metric an embedder's vectors are meant to be compared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in [0, 2].
    Cosine,
    /// Plain Euclidean distance.
    Euclidean,
    /// Euclidean distance between L2-normalized vectors, in [0, 2].
    EuclideanL2,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        };
        f.write_str(name)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Embedder version that produced this embedding (e.g., "arcface-w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>, model_version: impl Into<String>) -> Self {
        Self {
            values,
            model_version: Some(model_version.into()),
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Distance under `metric`. Lower = more similar.
    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => 1.0 - self.similarity(other),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::EuclideanL2 => {
                let a = l2_normalized(&self.values);
                let b = l2_normalized(&other.values);
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| (x - y).powi(2))
                    .sum::<f32>()
                    .sqrt()
            }
        }
    }
}

/// Return an L2-normalized copy of `values`. Zero vectors are returned unchanged.
pub fn l2_normalized(values: &[f32]) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values.to_vec()
    }
}

/// Identifier of a reference image: its path relative to the gallery root,
/// `"<label>/<file name>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(String);

impl ReferenceId {
    pub(crate) fn new(label: &Label, file_name: &str) -> Self {
        Self(format!("{}/{}", label.as_str(), file_name))
    }

    /// Parse an id supplied by a caller. Both halves must already be in
    /// stored form so the id can never address anything outside the root.
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        let (label, file_name) = raw
            .split_once('/')
            .ok_or_else(|| LabelError::Unsafe(raw.to_string()))?;

        let parsed = Label::parse(label)?;
        if parsed.as_str() != label {
            return Err(LabelError::Unsafe(raw.to_string()));
        }
        if !is_safe_file_name(file_name) {
            return Err(LabelError::Unsafe(raw.to_string()));
        }

        Ok(Self::new(&parsed, file_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Label directory half of the id.
    pub fn label(&self) -> Label {
        let (label, _) = self.0.split_once('/').unwrap_or((self.0.as_str(), ""));
        Label::from_stored(label)
    }

    /// File name half of the id.
    pub fn file_name(&self) -> &str {
        self.0.split_once('/').map(|(_, f)| f).unwrap_or("")
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

/// A stored reference photograph belonging to exactly one label.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceImage {
    pub id: ReferenceId,
    pub label: Label,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// One row of a gallery listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelSummary {
    pub name: String,
    pub count: usize,
}

/// Result of matching a query embedding against the gallery.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub reference_id: ReferenceId,
    pub label: Label,
    /// Distance under the index metric. Lower = more similar.
    pub distance: f32,
    /// 1-based position in the ranked result.
    pub rank: usize,
}
