//! Document metadata attached to history entries.
//!
//! Real extraction (title, authors, abstract from the PDF itself) lives
//! outside this crate; the queue only needs something implementing
//! [`MetadataExtractor`].

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, rename = "abstract", skip_serializing_if = "Option::is_none")]
    pub abstract_text: Option<String>,
}

/// Produces metadata for a source document when its history entry is first
/// created. Must not fail; return [`DocumentMetadata::default`] instead.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, source: &Path) -> DocumentMetadata;
}

/// Uses the file stem as the title.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameMetadata;

impl MetadataExtractor for FilenameMetadata {
    fn extract(&self, source: &Path) -> DocumentMetadata {
        let title = source
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty());
        DocumentMetadata {
            title,
            ..Default::default()
        }
    }
}
