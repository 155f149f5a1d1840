//! Data models for margin
//!
//! Defines the records that flow through a reconciliation pass: catalog
//! entries, imported book metadata, and annotation entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier of a catalog entry
pub type CatalogId = i64;

/// Genre marking a book as a news clipping collection
pub const NEWS_GENRE: &str = "News";

/// One book in the library catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryEntry {
    pub id: CatalogId,
    pub title: String,
    /// Authors in catalog order
    #[serde(default)]
    pub authors: Vec<String>,
    pub uuid: String,
}

impl LibraryEntry {
    pub fn new(
        id: CatalogId,
        title: impl Into<String>,
        authors: Vec<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            authors,
            uuid: uuid.into(),
        }
    }
}

/// Book metadata as reported by a reader app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportedBookMetadata {
    pub title: String,
    /// Single display string, e.g. "Herbert, Frank"
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub uuid: Option<String>,
    /// Comma separated genre list
    #[serde(default)]
    pub genre: String,
    pub reader_app: String,
    pub last_update: DateTime<Utc>,
    /// Device-local book identifier
    pub book_id: String,
    #[serde(default)]
    pub annotation_count: usize,
}

impl ImportedBookMetadata {
    /// Create metadata with only the required fields set
    pub fn new(
        reader_app: impl Into<String>,
        book_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: String::new(),
            uuid: None,
            genre: String::new(),
            reader_app: reader_app.into(),
            last_update: Utc::now(),
            book_id: book_id.into(),
            annotation_count: 0,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    /// Individual genres, split on commas
    pub fn genres(&self) -> impl Iterator<Item = &str> {
        self.genre
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
    }

    /// Whether this book is a collection of news clippings
    pub fn is_news(&self) -> bool {
        self.genres().any(|g| g == NEWS_GENRE)
    }
}

/// A single highlight or note captured on a reader
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnotationEntry {
    /// Content-derived key used for deduplication
    pub identity_key: String,
    pub text: String,
    pub location_marker: String,
    #[serde(default)]
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Highlight color or style name
    #[serde(default)]
    pub style: Option<String>,
}

impl AnnotationEntry {
    /// Create an entry, deriving its identity key from location and text
    pub fn new(
        location_marker: impl Into<String>,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let location_marker = location_marker.into();
        let text = text.into();
        Self {
            identity_key: identity_key(&location_marker, &text),
            text,
            location_marker,
            note: None,
            created_at,
            style: None,
        }
    }

    /// Override the derived identity key (reader apps with native ids)
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.identity_key = key.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }
}

/// Derive the identity key for a highlight
///
/// Formatting differences in the text (case, runs of whitespace) do not
/// change the key.
pub fn identity_key(location_marker: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(location_marker.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize(text).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Normalize a title, author, or highlight for comparison
///
/// Trims, collapses internal whitespace, and lowercases.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_identity_key_ignores_formatting() {
        let a = AnnotationEntry::new("p10", "The spice must flow.", ts());
        let b = AnnotationEntry::new(" p10 ", "the  spice\nmust flow.", ts());
        assert_eq!(a.identity_key, b.identity_key);
        assert_eq!(a.identity_key.len(), 32);
    }

    #[test]
    fn test_identity_key_depends_on_location() {
        let a = AnnotationEntry::new("p10", "Fear is the mind-killer.", ts());
        let b = AnnotationEntry::new("p11", "Fear is the mind-killer.", ts());
        assert_ne!(a.identity_key, b.identity_key);
    }

    #[test]
    fn test_entry_builders() {
        let entry = AnnotationEntry::new("p1", "text", ts())
            .with_key("k1")
            .with_note("a note")
            .with_style("yellow");
        assert_eq!(entry.identity_key, "k1");
        assert_eq!(entry.note.as_deref(), Some("a note"));
        assert_eq!(entry.style.as_deref(), Some("yellow"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Dune   Messiah "), "dune messiah");
        assert_eq!(normalize("Herbert,\tFrank"), "herbert, frank");
    }

    #[test]
    fn test_genres_and_news() {
        let book = ImportedBookMetadata::new("kindle", "b1", "Daily")
            .with_genre("Periodical, News");
        assert_eq!(book.genres().collect::<Vec<_>>(), vec!["Periodical", "News"]);
        assert!(book.is_news());

        let book = book.with_genre("Newsletters");
        assert!(!book.is_news());
    }

    #[test]
    fn test_metadata_serialization() {
        let book = ImportedBookMetadata::new("kindle", "b1", "Dune")
            .with_author("Herbert, Frank")
            .with_uuid("U1");
        let json = serde_json::to_string(&book).unwrap();
        let parsed: ImportedBookMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(book, parsed);
    }
}
