//! Per-reader-app archive of fetched annotations
//!
//! Rows are keyed by `(reader_app, book_id, identity_key)`. Writing an entry
//! whose key already exists replaces the stored fields but keeps the row's
//! original position, so rendering order stays stable across re-fetches.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::error::{StorageError, StorageResult};
use super::schema::{init_schema, needs_init};
use crate::config::Config;
use crate::document::render_block;
use crate::models::{AnnotationEntry, ImportedBookMetadata};

/// Stored annotations for one book
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookSummary {
    pub book_id: String,
    pub count: usize,
    /// Most recent fetch of this book's annotations
    pub last_update: DateTime<Utc>,
}

/// SQLite-backed annotation archive
pub struct AnnotationStore {
    conn: Mutex<Connection>,
}

impl AnnotationStore {
    /// Open or create the database under the configured data directory
    pub fn open(config: &Config) -> StorageResult<Self> {
        let path = config.sqlite_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(&path)?;
        if needs_init(&conn) {
            init_schema(&conn)?;
        }
        debug!("Opened annotation store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store entries for a book, replacing any with the same identity key
    ///
    /// All entries are written in one transaction.
    pub fn put_entries(
        &self,
        reader_app: &str,
        book_id: &str,
        entries: &[AnnotationEntry],
    ) -> StorageResult<()> {
        self.put_entries_at(reader_app, book_id, entries, Utc::now())
    }

    fn put_entries_at(
        &self,
        reader_app: &str,
        book_id: &str,
        entries: &[AnnotationEntry],
        fetched_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut next_seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq) + 1, 0) FROM annotations WHERE reader_app = ? AND book_id = ?",
            params![reader_app, book_id],
            |row| row.get(0),
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO annotations
                    (reader_app, book_id, identity_key, text, location_marker,
                     note, style, created_at, created_nanos, fetched_at, seq)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT (reader_app, book_id, identity_key) DO UPDATE SET
                    text = excluded.text,
                    location_marker = excluded.location_marker,
                    note = excluded.note,
                    style = excluded.style,
                    created_at = excluded.created_at,
                    created_nanos = excluded.created_nanos,
                    fetched_at = excluded.fetched_at
                "#,
            )?;

            for entry in entries {
                stmt.execute(params![
                    reader_app,
                    book_id,
                    entry.identity_key,
                    entry.text,
                    entry.location_marker,
                    entry.note,
                    entry.style,
                    entry.created_at.timestamp(),
                    i64::from(entry.created_at.timestamp_subsec_nanos()),
                    fetched_at.timestamp_millis(),
                    next_seq,
                ])?;
                next_seq += 1;
            }
        }

        tx.commit()?;
        debug!(
            "Stored {} annotation(s) for {}/{}",
            entries.len(),
            reader_app,
            book_id
        );
        Ok(())
    }

    /// Entries for a book in creation order
    pub fn entries(&self, reader_app: &str, book_id: &str) -> StorageResult<Vec<AnnotationEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT identity_key, text, location_marker, note, style, created_at,
                   created_nanos
            FROM annotations
            WHERE reader_app = ? AND book_id = ?
            ORDER BY created_at, created_nanos, seq
            "#,
        )?;

        let rows = stmt
            .query_map(params![reader_app, book_id], |row| {
                Ok(EntryRow {
                    identity_key: row.get(0)?,
                    text: row.get(1)?,
                    location_marker: row.get(2)?,
                    note: row.get(3)?,
                    style: row.get(4)?,
                    created_at: row.get(5)?,
                    created_nanos: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let created_at = u32::try_from(row.created_nanos)
                    .ok()
                    .and_then(|nanos| DateTime::from_timestamp(row.created_at, nanos))
                    .ok_or_else(|| StorageError::CorruptRow {
                        reader_app: reader_app.to_string(),
                        book_id: book_id.to_string(),
                        details: format!(
                            "invalid created_at {}.{:09}",
                            row.created_at, row.created_nanos
                        ),
                    })?;
                Ok(AnnotationEntry {
                    identity_key: row.identity_key,
                    text: row.text,
                    location_marker: row.location_marker,
                    note: row.note,
                    created_at,
                    style: row.style,
                })
            })
            .collect()
    }

    /// Number of stored entries for a book
    pub fn count(&self, reader_app: &str, book_id: &str) -> StorageResult<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM annotations WHERE reader_app = ? AND book_id = ?",
            params![reader_app, book_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// When the book's annotations were last fetched, if ever
    pub fn last_update(
        &self,
        reader_app: &str,
        book_id: &str,
    ) -> StorageResult<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self
            .conn()
            .query_row(
                "SELECT MAX(fetched_at) FROM annotations WHERE reader_app = ? AND book_id = ?",
                params![reader_app, book_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(millis.and_then(from_millis))
    }

    /// Render a book's stored entries as an annotation document
    ///
    /// The result has no user content and can be merged into any catalog
    /// document.
    pub fn render_as_document(
        &self,
        reader_app: &str,
        book_id: &str,
        metadata: &ImportedBookMetadata,
    ) -> StorageResult<String> {
        let entries = self.entries(reader_app, book_id)?;
        if entries.len() != metadata.annotation_count && metadata.annotation_count > 0 {
            debug!(
                "'{}' reports {} annotation(s), store has {}",
                metadata.title,
                metadata.annotation_count,
                entries.len()
            );
        }
        Ok(render_block(&entries))
    }

    /// Books with stored annotations for a reader app
    pub fn books(&self, reader_app: &str) -> StorageResult<Vec<BookSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT book_id, COUNT(*), MAX(fetched_at)
            FROM annotations
            WHERE reader_app = ?
            GROUP BY book_id
            ORDER BY book_id
            "#,
        )?;

        let rows = stmt
            .query_map(params![reader_app], |row| {
                let book_id: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                let fetched_at: i64 = row.get(2)?;
                Ok((book_id, count, fetched_at))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(book_id, count, fetched_at)| {
                let last_update =
                    from_millis(fetched_at).ok_or_else(|| StorageError::CorruptRow {
                        reader_app: reader_app.to_string(),
                        book_id: book_id.clone(),
                        details: format!("invalid fetched_at {}", fetched_at),
                    })?;
                Ok(BookSummary {
                    book_id,
                    count: count as usize,
                    last_update,
                })
            })
            .collect()
    }

    /// Delete every stored entry for a book, returning how many were removed
    pub fn remove_book(&self, reader_app: &str, book_id: &str) -> StorageResult<usize> {
        let removed = self.conn().execute(
            "DELETE FROM annotations WHERE reader_app = ? AND book_id = ?",
            params![reader_app, book_id],
        )?;
        Ok(removed)
    }
}

struct EntryRow {
    identity_key: String,
    text: String,
    location_marker: String,
    note: Option<String>,
    style: Option<String>,
    created_at: i64,
    created_nanos: i64,
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn entry(key: &str, minute: u32) -> AnnotationEntry {
        AnnotationEntry::new(key, format!("text at {}", key), ts(minute)).with_key(key)
    }

    fn keys(entries: &[AnnotationEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.identity_key.as_str()).collect()
    }

    #[test]
    fn test_put_and_read_entries() {
        let store = AnnotationStore::open_in_memory().unwrap();
        store
            .put_entries("kindle", "b1", &[entry("p10", 1), entry("p20", 2)])
            .unwrap();

        let entries = store.entries("kindle", "b1").unwrap();
        assert_eq!(keys(&entries), vec!["p10", "p20"]);
        assert_eq!(entries[0].created_at, ts(1));
        assert_eq!(store.count("kindle", "b1").unwrap(), 2);
    }

    #[test]
    fn test_created_at_keeps_sub_millisecond_precision() {
        let store = AnnotationStore::open_in_memory().unwrap();
        let created = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let before_epoch = Utc.timestamp_opt(-5, 999_999_999).unwrap();
        let stored = vec![
            AnnotationEntry::new("p1", "first", created).with_key("p1"),
            AnnotationEntry::new("p0", "older", before_epoch).with_key("p0"),
        ];
        store.put_entries("kindle", "b1", &stored).unwrap();

        let entries = store.entries("kindle", "b1").unwrap();
        assert_eq!(entries, vec![stored[1].clone(), stored[0].clone()]);

        // Rendered documents carry the exact timestamp too
        let metadata = ImportedBookMetadata::new("kindle", "b1", "Dune");
        let doc = store.render_as_document("kindle", "b1", &metadata).unwrap();
        let (rendered, _) = parse(&doc).unwrap();
        assert_eq!(rendered[1].created_at, created);
    }

    #[test]
    fn test_ordering_within_one_second() {
        let store = AnnotationStore::open_in_memory().unwrap();
        let at = |nanos| Utc.timestamp_opt(1_700_000_000, nanos).unwrap();
        store
            .put_entries(
                "kindle",
                "b1",
                &[
                    AnnotationEntry::new("a", "a", at(900)).with_key("late"),
                    AnnotationEntry::new("b", "b", at(100)).with_key("early"),
                ],
            )
            .unwrap();
        let entries = store.entries("kindle", "b1").unwrap();
        assert_eq!(keys(&entries), vec!["early", "late"]);
    }

    #[test]
    fn test_partitions_are_independent() {
        let store = AnnotationStore::open_in_memory().unwrap();
        store.put_entries("kindle", "b1", &[entry("p1", 1)]).unwrap();
        store.put_entries("kindle", "b2", &[entry("p1", 1)]).unwrap();
        store.put_entries("kobo", "b1", &[entry("p1", 1)]).unwrap();

        assert_eq!(store.count("kindle", "b1").unwrap(), 1);
        assert_eq!(store.count("kindle", "b2").unwrap(), 1);
        assert_eq!(store.count("kobo", "b1").unwrap(), 1);
        assert_eq!(store.count("kobo", "b2").unwrap(), 0);
    }

    #[test]
    fn test_refetch_replaces_entry_in_place() {
        let store = AnnotationStore::open_in_memory().unwrap();
        store
            .put_entries("kindle", "b1", &[entry("a", 1), entry("b", 1)])
            .unwrap();
        store
            .put_entries("kindle", "b1", &[entry("a", 1).with_note("added later")])
            .unwrap();

        let entries = store.entries("kindle", "b1").unwrap();
        assert_eq!(keys(&entries), vec!["a", "b"]);
        assert_eq!(entries[0].note.as_deref(), Some("added later"));
        assert_eq!(store.count("kindle", "b1").unwrap(), 2);
    }

    #[test]
    fn test_order_by_creation_then_insertion() {
        let store = AnnotationStore::open_in_memory().unwrap();
        store
            .put_entries(
                "kindle",
                "b1",
                &[entry("late", 9), entry("x", 1), entry("y", 1)],
            )
            .unwrap();

        let entries = store.entries("kindle", "b1").unwrap();
        assert_eq!(keys(&entries), vec!["x", "y", "late"]);
    }

    #[test]
    fn test_last_update_tracks_fetch_time() {
        let store = AnnotationStore::open_in_memory().unwrap();
        assert!(store.last_update("kindle", "b1").unwrap().is_none());

        let first = ts(30);
        let second = first + Duration::hours(2);
        store
            .put_entries_at("kindle", "b1", &[entry("a", 1)], first)
            .unwrap();
        assert_eq!(store.last_update("kindle", "b1").unwrap(), Some(first));

        store
            .put_entries_at("kindle", "b1", &[entry("b", 2)], second)
            .unwrap();
        assert_eq!(store.last_update("kindle", "b1").unwrap(), Some(second));
    }

    #[test]
    fn test_render_as_document_is_mergeable() {
        let store = AnnotationStore::open_in_memory().unwrap();
        store
            .put_entries("kindle", "b1", &[entry("p10", 1), entry("p20", 2)])
            .unwrap();
        let metadata = ImportedBookMetadata::new("kindle", "b1", "Dune");

        let doc = store.render_as_document("kindle", "b1", &metadata).unwrap();
        let (entries, outer) = parse(&doc).unwrap();
        assert!(outer.is_blank());
        assert_eq!(keys(&entries), vec!["p10", "p20"]);

        // Same input, same bytes
        let again = store.render_as_document("kindle", "b1", &metadata).unwrap();
        assert_eq!(doc, again);
    }

    #[test]
    fn test_books_listing() {
        let store = AnnotationStore::open_in_memory().unwrap();
        store
            .put_entries_at("kindle", "b2", &[entry("a", 1)], ts(5))
            .unwrap();
        store
            .put_entries_at("kindle", "b1", &[entry("a", 1), entry("b", 2)], ts(6))
            .unwrap();
        store.put_entries("kobo", "b3", &[entry("a", 1)]).unwrap();

        let books = store.books("kindle").unwrap();
        assert_eq!(
            books,
            vec![
                BookSummary {
                    book_id: "b1".to_string(),
                    count: 2,
                    last_update: ts(6),
                },
                BookSummary {
                    book_id: "b2".to_string(),
                    count: 1,
                    last_update: ts(5),
                },
            ]
        );
    }

    #[test]
    fn test_remove_book() {
        let store = AnnotationStore::open_in_memory().unwrap();
        store
            .put_entries("kindle", "b1", &[entry("a", 1), entry("b", 2)])
            .unwrap();
        assert_eq!(store.remove_book("kindle", "b1").unwrap(), 2);
        assert_eq!(store.count("kindle", "b1").unwrap(), 0);
    }

    #[test]
    fn test_open_on_disk_persists() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            data_dir: temp_dir.path().join("data"),
            ..Config::default()
        };

        {
            let store = AnnotationStore::open(&config).unwrap();
            store.put_entries("kindle", "b1", &[entry("a", 1)]).unwrap();
        }

        let store = AnnotationStore::open(&config).unwrap();
        assert_eq!(store.count("kindle", "b1").unwrap(), 1);
        assert!(config.sqlite_path().exists());
    }
}
