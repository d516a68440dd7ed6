//! Gallery labels (identities) and their path-safe normalization.
//!
//! A label is stored on disk as a directory directly under the gallery root,
//! so its name must never contain a separator or be able to address a
//! parent or hidden directory.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Character substituted for separators and control characters.
const PLACEHOLDER: char = '_';

/// Longest label in bytes; common filesystems cap a path component at 255.
pub const MAX_LABEL_BYTES: usize = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("label is empty")]
    Empty,
    #[error("label would escape the gallery root: {0:?}")]
    Unsafe(String),
    #[error("label is {0} bytes long, limit is {max}", max = MAX_LABEL_BYTES)]
    TooLong(usize),
}

/// A sanitized, non-empty label name. Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    /// Normalize a user-supplied label.
    ///
    /// Surrounding whitespace is trimmed and `/`, `\` and control characters
    /// become `_`, so `"a/b"` is stored as `"a_b"`. Names that are empty after
    /// trimming, that start with `.` (`.`, `..`, `../x`, hidden entries), or
    /// that exceed [`MAX_LABEL_BYTES`] are rejected.
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LabelError::Empty);
        }
        if trimmed.starts_with('.') {
            return Err(LabelError::Unsafe(raw.to_string()));
        }

        let sanitized: String = trimmed
            .chars()
            .map(|c| {
                if c == '/' || c == '\\' || c.is_control() {
                    PLACEHOLDER
                } else {
                    c
                }
            })
            .collect();
        if sanitized.len() > MAX_LABEL_BYTES {
            return Err(LabelError::TooLong(sanitized.len()));
        }

        Ok(Self(sanitized))
    }

    /// Wrap a directory name read back from the gallery root.
    pub(crate) fn from_stored(name: &str) -> Self {
        Self(name.to_string())
    }

    /// True when `name` is exactly what [`Label::parse`] would store for it.
    pub(crate) fn is_stored_form(name: &str) -> bool {
        Label::parse(name).is_ok_and(|label| label.as_str() == name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
