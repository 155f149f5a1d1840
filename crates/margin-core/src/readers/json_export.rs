//! Reader app backed by a normalized JSON export
//!
//! ```json
//! {
//!   "reader_app": "kindle",
//!   "books": [{
//!     "book_id": "B00X", "title": "Dune", "author": "Herbert, Frank",
//!     "uuid": "U1", "genre": "Fiction", "last_update": "2024-03-01T12:00:00Z",
//!     "annotations": [{
//!       "location": "p10", "text": "The spice must flow.",
//!       "created_at": "2024-03-01T12:00:00Z", "note": null, "style": "yellow"
//!     }]
//!   }]
//! }
//! ```
//!
//! Annotations without a `key` get one derived from location and text.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ReaderApp, ReaderError};
use crate::models::{AnnotationEntry, ImportedBookMetadata};

/// Top-level export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFile {
    pub reader_app: String,
    #[serde(default)]
    pub books: Vec<ExportedBook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedBook {
    pub book_id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub genre: String,
    pub last_update: DateTime<Utc>,
    #[serde(default)]
    pub annotations: Vec<ExportedAnnotation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedAnnotation {
    /// Native identifier, when the reader app provides one
    #[serde(default)]
    pub key: Option<String>,
    pub location: String,
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub style: Option<String>,
}

impl ExportedBook {
    fn metadata(&self, reader_app: &str) -> ImportedBookMetadata {
        ImportedBookMetadata {
            title: self.title.clone(),
            author: self.author.clone(),
            uuid: self.uuid.clone().filter(|u| !u.trim().is_empty()),
            genre: self.genre.clone(),
            reader_app: reader_app.to_string(),
            last_update: self.last_update,
            book_id: self.book_id.clone(),
            annotation_count: self.annotations.len(),
        }
    }
}

impl From<&ExportedAnnotation> for AnnotationEntry {
    fn from(a: &ExportedAnnotation) -> Self {
        let mut entry = AnnotationEntry::new(a.location.clone(), a.text.clone(), a.created_at);
        if let Some(key) = a.key.as_deref().filter(|k| !k.is_empty()) {
            entry = entry.with_key(key);
        }
        entry.note = a.note.clone();
        entry.style = a.style.clone();
        entry
    }
}

/// Reader app serving one export file
#[derive(Debug, Clone)]
pub struct JsonExportReader {
    path: PathBuf,
    export: ExportFile,
}

impl JsonExportReader {
    /// Read and parse an export file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path).map_err(|source| ReaderError::Unreadable {
            path: path.clone(),
            source,
        })?;
        let export = serde_json::from_str(&content).map_err(|source| {
            ReaderError::InvalidExport {
                path: path.clone(),
                source,
            }
        })?;
        let reader = Self::from_export(path, export);
        debug!(
            "Loaded {} book(s) for '{}' from {:?}",
            reader.export.books.len(),
            reader.export.reader_app,
            reader.path
        );
        Ok(reader)
    }

    pub fn from_export(path: impl Into<PathBuf>, export: ExportFile) -> Self {
        Self {
            path: path.into(),
            export,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn book(&self, book_id: &str) -> Result<&ExportedBook, ReaderError> {
        self.export
            .books
            .iter()
            .find(|b| b.book_id == book_id)
            .ok_or_else(|| ReaderError::BookNotFound {
                app: self.export.reader_app.clone(),
                book_id: book_id.to_string(),
            })
    }
}

impl ReaderApp for JsonExportReader {
    fn name(&self) -> &str {
        &self.export.reader_app
    }

    fn installed_books(&self) -> Result<Vec<ImportedBookMetadata>, ReaderError> {
        Ok(self
            .export
            .books
            .iter()
            .map(|b| b.metadata(&self.export.reader_app))
            .collect())
    }

    fn active_annotations(&self, book_id: &str) -> Result<Vec<AnnotationEntry>, ReaderError> {
        Ok(self
            .book(book_id)?
            .annotations
            .iter()
            .map(AnnotationEntry::from)
            .collect())
    }
}
