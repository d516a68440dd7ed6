//! Durable gallery of labeled reference images.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<label>/<uuid>.<ext>     reference images
//! <root>/.embeddings.sqlite3      embedding cache (when persisted)
//! ```
//!
//! Entries starting with `.` are store-internal and never listed. New files
//! are written to a hidden temp name and renamed into place, so readers never
//! observe a partially written image. Writes to one label are serialized;
//! different labels proceed independently.

use crate::cache::{CacheError, CacheKey, ComputeError, EmbeddingCache};
use crate::capability::{Embedder, EmbeddingError};
use crate::codec::{self, CodecError};
use crate::label::{Label, LabelError};
use crate::matcher::EmbeddingIndex;
use crate::types::{is_safe_file_name, Embedding, LabelSummary, ReferenceId, ReferenceImage};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use uuid::Uuid;

/// File name of the persisted embedding cache inside the gallery root.
pub const CACHE_FILE_NAME: &str = ".embeddings.sqlite3";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid label: {0}")]
    InvalidLabel(#[from] LabelError),
    #[error(transparent)]
    InvalidImage(#[from] CodecError),
    #[error("storage: {0}")]
    Storage(#[from] io::Error),
    #[error("embedding cache: {0}")]
    Cache(#[from] CacheError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("reference not found: {0}")]
    ReferenceNotFound(ReferenceId),
    #[error("label not found: {0}")]
    LabelNotFound(Label),
}

pub struct GalleryStore {
    root: PathBuf,
    embedder: Arc<dyn Embedder>,
    cache: EmbeddingCache,
    label_locks: Mutex<HashMap<Label, Arc<Mutex<()>>>>,
}

impl GalleryStore {
    /// Open the gallery at `root`, creating the directory if needed.
    ///
    /// Cache entries from other embedder versions, or for references no
    /// longer on disk, are pruned.
    pub fn open(
        root: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        cache: EmbeddingCache,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;

        let store = Self {
            root,
            embedder,
            cache,
            label_locks: Mutex::new(HashMap::new()),
        };

        let stale_versions = store.cache.retain_version(store.embedder.version())?;
        let live: HashSet<ReferenceId> = store.references(None)?.into_iter().map(|r| r.id).collect();
        let stale_references = store.cache.retain_references(&live)?;

        tracing::info!(
            root = %store.root.display(),
            embedder = store.embedder.version(),
            references = live.len(),
            cached = store.cache.len(),
            stale_versions,
            stale_references,
            "gallery opened"
        );

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn cached_embeddings(&self) -> usize {
        self.cache.len()
    }

    /// Absolute path of a reference's image file.
    pub fn path_of(&self, id: &ReferenceId) -> PathBuf {
        self.root.join(id.label().as_str()).join(id.file_name())
    }

    /// Store `image_bytes` as a new reference under `label`.
    ///
    /// The bytes must decode as an image; nothing is written otherwise.
    pub fn add_reference(&self, label: &str, image_bytes: &[u8]) -> Result<ReferenceImage, StoreError> {
        let label = Label::parse(label)?;
        let image = codec::decode(image_bytes)?;

        let dir = self.root.join(label.as_str());
        let file_name = format!("{}.{}", Uuid::new_v4().simple(), image.extension());
        let path = dir.join(&file_name);
        self.with_label_lock(&label, || -> io::Result<()> {
            fs::create_dir_all(&dir)?;
            write_atomically(&dir.join(format!(".{file_name}.tmp")), &path, image_bytes)
        })?;

        let reference = ReferenceImage {
            id: ReferenceId::new(&label, &file_name),
            label,
            path,
            created_at: Utc::now(),
        };
        tracing::info!(
            id = %reference.id,
            label = %reference.label,
            width = image.width(),
            height = image.height(),
            bytes = image_bytes.len(),
            "reference added"
        );
        Ok(reference)
    }

    /// Labels with at least one reference and their reference counts,
    /// ordered by name. Reflects what is on disk right now.
    pub fn list_labels(&self) -> Result<Vec<LabelSummary>, StoreError> {
        let mut summaries = Vec::new();
        for label in self.label_dirs()? {
            let count = self.reference_files(&label)?.len();
            if count > 0 {
                summaries.push(LabelSummary {
                    name: label.to_string(),
                    count,
                });
            }
        }
        Ok(summaries)
    }

    /// References under `label`, or under every label, ordered by id.
    pub fn references(&self, label: Option<&Label>) -> Result<Vec<ReferenceImage>, StoreError> {
        let labels = match label {
            Some(label) => vec![label.clone()],
            None => self.label_dirs()?,
        };

        let mut references = Vec::new();
        for label in labels {
            for (file_name, created_at) in self.reference_files(&label)? {
                references.push(ReferenceImage {
                    id: ReferenceId::new(&label, &file_name),
                    path: self.root.join(label.as_str()).join(&file_name),
                    label: label.clone(),
                    created_at,
                });
            }
        }
        references.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(references)
    }

    /// Delete one reference and its cached embeddings.
    pub fn remove_reference(&self, id: &ReferenceId) -> Result<(), StoreError> {
        let path = self.path_of(id);
        if !path.is_file() {
            return Err(StoreError::ReferenceNotFound(id.clone()));
        }

        let evicted = self.with_label_lock(&id.label(), || -> Result<usize, StoreError> {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::ReferenceNotFound(id.clone()));
                }
                Err(e) => return Err(e.into()),
            }
            Ok(self.cache.remove_reference(id)?)
        })?;
        tracing::info!(%id, evicted, "reference removed");
        Ok(())
    }

    /// Delete a label with all its references and their cached embeddings.
    /// Returns the number of references removed.
    pub fn remove_label(&self, label: &Label) -> Result<usize, StoreError> {
        let dir = self.root.join(label.as_str());
        if !dir.is_dir() {
            return Err(StoreError::LabelNotFound(label.clone()));
        }

        let removed = self.with_label_lock(label, || -> Result<usize, StoreError> {
            let references = self.reference_files(label)?;
            match fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StoreError::LabelNotFound(label.clone()));
                }
                Err(e) => return Err(e.into()),
            }
            for (file_name, _) in &references {
                self.cache.remove_reference(&ReferenceId::new(label, file_name))?;
            }
            Ok(references.len())
        })?;

        tracing::info!(%label, references = removed, "label removed");
        Ok(removed)
    }

    /// Embed every reference on disk and return the resulting index.
    ///
    /// Cached embeddings are reused; missing ones are computed at most once
    /// even under concurrent callers. A reference that cannot be read,
    /// decoded or embedded is logged and left out of the index.
    pub fn embedding_index(&self) -> Result<EmbeddingIndex, StoreError> {
        let version = self.embedder.version();
        let mut index = EmbeddingIndex::new(version, self.embedder.metric());

        for reference in self.references(None)? {
            let key = CacheKey::new(reference.id.clone(), version);
            let mut computed_here = false;
            let outcome = self.cache.get_or_compute(&key, || {
                computed_here = true;
                self.compute_embedding(&reference)
            });
            match outcome {
                Ok(embedding) => {
                    if computed_here && !self.confirm_committed(&reference)? {
                        continue;
                    }
                    index.insert(reference.id, reference.label, embedding)
                }
                Err(ComputeError::Cache(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(id = %reference.id, error = %e, "skipping reference: no embedding");
                    index.mark_skipped();
                }
            }
        }

        tracing::debug!(entries = index.len(), skipped = index.skipped(), "embedding index ready");
        Ok(index)
    }

    fn compute_embedding(&self, reference: &ReferenceImage) -> Result<Embedding, StoreError> {
        let bytes = fs::read(&reference.path)?;
        let image = codec::decode(&bytes)?;
        let mut embedding = self.embedder.embed(&image, None)?;
        embedding.model_version = Some(self.embedder.version().to_string());
        tracing::debug!(id = %reference.id, dim = embedding.dim(), "embedding computed");
        Ok(embedding)
    }

    /// Re-check, under the label lock, that a freshly cached reference still
    /// exists. A removal that ran while its embedding was being computed has
    /// already evicted the key, so the late commit is evicted here.
    fn confirm_committed(&self, reference: &ReferenceImage) -> Result<bool, StoreError> {
        self.with_label_lock(&reference.label, || -> Result<bool, StoreError> {
            if reference.path.is_file() {
                return Ok(true);
            }
            self.cache.remove_reference(&reference.id)?;
            tracing::debug!(id = %reference.id, "reference removed during embedding; dropped from cache");
            Ok(false)
        })
    }

    /// Run `f` holding the write lock for `label`.
    ///
    /// Lock entries exist only while some caller holds or waits on them; the
    /// last user removes the entry, so the map stays bounded by concurrency.
    fn with_label_lock<T>(&self, label: &Label, f: impl FnOnce() -> T) -> T {
        let lock = self.locks().entry(label.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };
        drop(lock);

        let mut locks = self.locks();
        // New clones are only taken under the map lock, so a count of one
        // means nobody else holds or waits on this entry.
        if locks.get(label).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(label);
        }
        result
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, HashMap<Label, Arc<Mutex<()>>>> {
        self.label_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Label directories directly under the root, sorted.
    fn label_dirs(&self) -> Result<Vec<Label>, StoreError> {
        let mut labels = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if Label::is_stored_form(&name) {
                labels.push(Label::from_stored(&name));
            } else if !name.starts_with('.') {
                tracing::debug!(name, "ignoring directory with non-label name");
            }
        }
        labels.sort();
        Ok(labels)
    }

    /// Visible regular files in a label directory, with their timestamps.
    /// A directory removed concurrently reads as empty.
    fn reference_files(&self, label: &Label) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let entries = match fs::read_dir(self.root.join(label.as_str())) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_safe_file_name(&name) {
                continue;
            }
            let created_at = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            files.push((name, created_at));
        }
        files.sort();
        Ok(files)
    }
}

/// Write `bytes` to `tmp`, flush to disk, then rename over `dest`.
fn write_atomically(tmp: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    let result = (|| {
        let mut file = fs::File::create(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(tmp, dest)
    })();

    if result.is_err() {
        let _ = fs::remove_file(tmp);
    }
    result
}
