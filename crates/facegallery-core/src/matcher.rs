//! Nearest-neighbour ranking of gallery references against a query embedding.

use crate::label::Label;
use crate::types::{DistanceMetric, Embedding, MatchResult, ReferenceId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Default maximum cosine distance for ArcFace embeddings.
pub const DEFAULT_MAX_DISTANCE: f32 = 0.68;
pub const DEFAULT_TOP_K: usize = 10;

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("query embedding from {query} cannot be compared with index built by {index}")]
    VersionMismatch { query: String, index: String },
}

/// Limits applied to a ranked result.
#[derive(Debug, Clone, Copy)]
pub struct MatchOptions {
    /// Maximum number of results.
    pub top_k: usize,
    /// Candidates farther than this are dropped.
    pub max_distance: f32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

/// Snapshot of every embedded gallery reference for one embedder version.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    version: String,
    metric: DistanceMetric,
    entries: Vec<(ReferenceId, Arc<Embedding>)>,
    labels: HashMap<ReferenceId, Label>,
    skipped: usize,
}

impl EmbeddingIndex {
    pub fn new(version: impl Into<String>, metric: DistanceMetric) -> Self {
        Self {
            version: version.into(),
            metric,
            entries: Vec::new(),
            labels: HashMap::new(),
            skipped: 0,
        }
    }

    pub fn insert(&mut self, reference_id: ReferenceId, label: Label, embedding: Arc<Embedding>) {
        self.labels.insert(reference_id.clone(), label);
        self.entries.push((reference_id, embedding));
    }

    /// Count a reference that could not be embedded.
    pub fn mark_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// References left out because their embedding failed.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn label_of(&self, reference_id: &ReferenceId) -> Option<&Label> {
        self.labels.get(reference_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReferenceId, &Embedding)> {
        self.entries.iter().map(|(id, embedding)| (id, embedding.as_ref()))
    }
}

/// Strategy for ranking gallery entries against a query embedding.
pub trait Matcher {
    fn find_matches(
        &self,
        query: &Embedding,
        index: &EmbeddingIndex,
        options: &MatchOptions,
    ) -> Result<Vec<MatchResult>, MatchError>;
}

/// Scores every index entry under the index's metric.
///
/// Always traverses the whole index; there is no early exit on a good match.
pub struct ExhaustiveMatcher;

impl Matcher for ExhaustiveMatcher {
    fn find_matches(
        &self,
        query: &Embedding,
        index: &EmbeddingIndex,
        options: &MatchOptions,
    ) -> Result<Vec<MatchResult>, MatchError> {
        if let Some(query_version) = &query.model_version {
            if query_version != index.version() {
                return Err(MatchError::VersionMismatch {
                    query: query_version.clone(),
                    index: index.version().to_string(),
                });
            }
        }

        let mut scored: Vec<(f32, &ReferenceId)> = Vec::with_capacity(index.len());
        for (reference_id, embedding) in index.iter() {
            if embedding.dim() != query.dim() {
                tracing::warn!(
                    %reference_id,
                    expected = query.dim(),
                    actual = embedding.dim(),
                    "skipping index entry with mismatched dimension"
                );
                continue;
            }
            scored.push((query.distance(embedding, index.metric()), reference_id));
        }

        scored.retain(|(distance, _)| *distance <= options.max_distance);
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        scored.truncate(options.top_k);

        Ok(scored
            .into_iter()
            .enumerate()
            .filter_map(|(i, (distance, reference_id))| {
                let label = index.label_of(reference_id)?.clone();
                Some(MatchResult {
                    reference_id: reference_id.clone(),
                    label,
                    distance,
                    rank: i + 1,
                })
            })
            .collect())
    }
}
