use crate::detector::DetectorParams;
use crate::matcher::{MatchOptions, DEFAULT_MAX_DISTANCE, DEFAULT_TOP_K};
use crate::store::CACHE_FILE_NAME;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Which D-Bus bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus {other:?}")),
        }
    }
}

/// Gallery configuration.
///
/// Loaded from an optional TOML file named by `FACEGALLERY_CONFIG`, then
/// overridden by `FACEGALLERY_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory holding one subdirectory per label.
    pub gallery_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Embedding cache database; defaults to a hidden file in `gallery_dir`.
    pub cache_path: Option<PathBuf>,
    /// Keep the embedding cache in memory only.
    pub in_memory_cache: bool,
    /// Maximum distance for a gallery entry to count as a match.
    pub max_distance: f32,
    /// Maximum number of matches returned per query.
    pub top_k: usize,
    /// Fail instead of embedding the whole image when no face is detected.
    pub enforce_detection: bool,
    pub detector_score_threshold: f32,
    pub detector_nms_threshold: f32,
    /// Timeout in seconds for one daemon request.
    pub request_timeout_secs: u64,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let detector = DetectorParams::default();
        Self {
            gallery_dir: data_dir().join("gallery"),
            cache_path: None,
            in_memory_cache: false,
            model_dir: default_model_dir(),
            max_distance: DEFAULT_MAX_DISTANCE,
            top_k: DEFAULT_TOP_K,
            enforce_detection: false,
            detector_score_threshold: detector.score_threshold,
            detector_nms_threshold: detector.nms_threshold,
            request_timeout_secs: 30,
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and `FACEGALLERY_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FACEGALLERY_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file; keys it omits keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `FACEGALLERY_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACEGALLERY_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("FACEGALLERY_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("FACEGALLERY_CACHE_PATH") {
            match path.as_str() {
                "" | "memory" => self.in_memory_cache = true,
                _ => self.cache_path = Some(PathBuf::from(path)),
            }
        }

        override_parsed(&lookup, "FACEGALLERY_MAX_DISTANCE", &mut self.max_distance);
        override_parsed(&lookup, "FACEGALLERY_TOP_K", &mut self.top_k);
        override_parsed(&lookup, "FACEGALLERY_ENFORCE_DETECTION", &mut self.enforce_detection);
        override_parsed(&lookup, "FACEGALLERY_DETECTOR_SCORE_THRESHOLD", &mut self.detector_score_threshold);
        override_parsed(&lookup, "FACEGALLERY_DETECTOR_NMS_THRESHOLD", &mut self.detector_nms_threshold);
        override_parsed(&lookup, "FACEGALLERY_REQUEST_TIMEOUT_SECS", &mut self.request_timeout_secs);
        override_parsed(&lookup, "FACEGALLERY_BUS", &mut self.bus);
    }

    /// Resolved cache database path, or `None` for an in-memory cache.
    pub fn cache_file(&self) -> Option<PathBuf> {
        if self.in_memory_cache {
            return None;
        }
        Some(
            self.cache_path
                .clone()
                .unwrap_or_else(|| self.gallery_dir.join(CACHE_FILE_NAME)),
        )
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            score_threshold: self.detector_score_threshold,
            nms_threshold: self.detector_nms_threshold,
            ..DetectorParams::default()
        }
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            top_k: self.top_k,
            max_distance: self.max_distance,
        }
    }
}

/// `$XDG_DATA_HOME/facegallery/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    data_dir().join("models")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegallery")
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable override"),
    }
}
