//! Lookup maps over a catalog snapshot
//!
//! `IndexHandle` is an immutable value: the maps plus the token and library
//! identity they were built from. `LibraryIndexer` caches the latest handle
//! and rebuilds it under a mutex when it goes stale.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use super::catalog::{Catalog, CatalogError, ModificationToken};
use crate::models::{normalize, CatalogId, LibraryEntry};

/// Value stored under a uuid
#[derive(Debug, Clone, PartialEq)]
pub struct UuidRecord {
    pub id: CatalogId,
    pub title: String,
    pub authors: Vec<String>,
}

/// Value stored under a normalized title
#[derive(Debug, Clone, PartialEq)]
pub struct TitleRecord {
    pub id: CatalogId,
    pub authors: Vec<String>,
}

/// Lookup maps built from one catalog snapshot
#[derive(Debug, Clone)]
pub struct IndexHandle {
    library_id: String,
    built_at: ModificationToken,
    uuid_map: HashMap<String, UuidRecord>,
    title_map: HashMap<String, TitleRecord>,
    entries: HashMap<CatalogId, LibraryEntry>,
}

impl IndexHandle {
    /// Build the maps from a snapshot
    ///
    /// Entries without a uuid are only reachable by title. When two entries
    /// share a title the later one wins.
    pub fn build(
        library_id: impl Into<String>,
        built_at: ModificationToken,
        snapshot: Vec<LibraryEntry>,
    ) -> Self {
        let mut uuid_map = HashMap::with_capacity(snapshot.len());
        let mut title_map = HashMap::with_capacity(snapshot.len());
        let mut entries = HashMap::with_capacity(snapshot.len());

        for entry in snapshot {
            if !entry.uuid.trim().is_empty() {
                uuid_map.insert(
                    entry.uuid.trim().to_string(),
                    UuidRecord {
                        id: entry.id,
                        title: entry.title.clone(),
                        authors: entry.authors.clone(),
                    },
                );
            }
            title_map.insert(
                normalize(&entry.title),
                TitleRecord {
                    id: entry.id,
                    authors: entry.authors.clone(),
                },
            );
            entries.insert(entry.id, entry);
        }

        Self {
            library_id: library_id.into(),
            built_at,
            uuid_map,
            title_map,
            entries,
        }
    }

    /// Whether this handle still describes the given catalog state
    pub fn is_current(&self, library_id: &str, token: &ModificationToken) -> bool {
        self.library_id == library_id && &self.built_at == token
    }

    pub fn built_at(&self) -> &ModificationToken {
        &self.built_at
    }

    pub fn library_id(&self) -> &str {
        &self.library_id
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&UuidRecord> {
        self.uuid_map.get(uuid.trim())
    }

    /// Look up a title (normalized before lookup)
    pub fn by_title(&self, title: &str) -> Option<&TitleRecord> {
        self.title_map.get(&normalize(title))
    }

    /// Full catalog row for an id
    pub fn entry(&self, id: CatalogId) -> Option<&LibraryEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Caches the current `IndexHandle` for a catalog
///
/// `current` holds the mutex for the whole check-and-rebuild, so a second
/// caller arriving mid-build waits and then receives the fresh handle
/// instead of starting its own build.
#[derive(Debug, Default)]
pub struct LibraryIndexer {
    cached: Mutex<Option<Arc<IndexHandle>>>,
}

impl LibraryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an up-to-date handle, rebuilding if the catalog changed
    pub fn current(&self, catalog: &dyn Catalog) -> Result<Arc<IndexHandle>, CatalogError> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);

        let library_id = catalog.library_id();
        let token = catalog.modification_timestamp()?;

        if let Some(handle) = cached.as_ref() {
            if handle.is_current(&library_id, &token) {
                debug!("Library index current ({})", token);
                return Ok(Arc::clone(handle));
            }
        }

        info!("Updating library index for {}", library_id);
        let snapshot = catalog.get_entries()?;
        let handle = Arc::new(IndexHandle::build(library_id, token, snapshot));
        debug!("Indexed {} catalog entries", handle.len());

        *cached = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Build (or confirm) the index on a background thread
    pub fn spawn_refresh(
        self: &Arc<Self>,
        catalog: Arc<dyn Catalog>,
    ) -> JoinHandle<Result<Arc<IndexHandle>, CatalogError>> {
        let indexer = Arc::clone(self);
        thread::spawn(move || indexer.current(catalog.as_ref()))
    }

    /// Drop the cached handle (e.g. when a different library is opened)
    pub fn invalidate(&self) {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        *cached = None;
    }

    /// Whether a handle is cached, without checking freshness
    pub fn is_built(&self) -> bool {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::MemoryCatalog;

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new("lib-a");
        catalog.insert(LibraryEntry::new(
            42,
            "Dune",
            vec!["Herbert, Frank".to_string()],
            "U1",
        ));
        catalog.insert(LibraryEntry::new(7, "Emma", vec!["Austen, Jane".to_string()], ""));
        catalog
    }

    #[test]
    fn test_build_maps() {
        let handle = IndexHandle::build(
            "lib",
            ModificationToken("1".into()),
            catalog().get_entries().unwrap(),
        );

        let by_uuid = handle.by_uuid("U1").unwrap();
        assert_eq!(by_uuid.id, 42);
        assert_eq!(by_uuid.title, "Dune");

        assert_eq!(handle.by_title("  dune ").unwrap().id, 42);
        assert_eq!(handle.by_title("Emma").unwrap().authors, vec!["Austen, Jane"]);

        // Empty uuids are not indexed
        assert!(handle.by_uuid("").is_none());
        assert_eq!(handle.len(), 2);
    }

    #[test]
    fn test_duplicate_titles_last_wins() {
        let entries = vec![
            LibraryEntry::new(1, "Poems", vec!["A".into()], "U1"),
            LibraryEntry::new(2, "Poems", vec!["B".into()], "U2"),
        ];
        let handle = IndexHandle::build("lib", ModificationToken("1".into()), entries);
        assert_eq!(handle.by_title("Poems").unwrap().id, 2);
        assert_eq!(handle.by_uuid("U1").unwrap().id, 1);
    }

    #[test]
    fn test_indexer_reuses_current_handle() {
        let catalog = catalog();
        let indexer = LibraryIndexer::new();

        let first = indexer.current(&catalog).unwrap();
        let second = indexer.current(&catalog).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(catalog.snapshot_count(), 1);
    }

    #[test]
    fn test_indexer_rebuilds_on_change() {
        let catalog = catalog();
        let indexer = LibraryIndexer::new();

        let first = indexer.current(&catalog).unwrap();
        catalog.insert(LibraryEntry::new(9, "Solaris", vec![], "U9"));
        let second = indexer.current(&catalog).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.by_uuid("U9").is_some());
        assert_eq!(catalog.snapshot_count(), 2);
    }

    #[test]
    fn test_indexer_rebuilds_for_different_library() {
        let a = catalog();
        let b = MemoryCatalog::new("lib-b");
        b.insert(LibraryEntry::new(1, "Dune", vec![], "U1"));
        let indexer = LibraryIndexer::new();

        indexer.current(&a).unwrap();
        // Same revision number, different library identity
        let handle = indexer.current(&b).unwrap();
        assert_eq!(handle.library_id(), "lib-b");
        assert_eq!(handle.by_uuid("U1").unwrap().id, 1);
    }

    #[test]
    fn test_indexer_propagates_unavailable() {
        let catalog = catalog();
        catalog.set_unavailable(true);
        let indexer = LibraryIndexer::new();
        assert!(matches!(
            indexer.current(&catalog),
            Err(CatalogError::Unavailable(_))
        ));
        assert!(!indexer.is_built());
    }

    #[test]
    fn test_concurrent_callers_share_one_build() {
        let catalog: Arc<MemoryCatalog> = Arc::new(catalog());
        let indexer = Arc::new(LibraryIndexer::new());

        let handles: Vec<_> = (0..8)
            .map(|_| indexer.spawn_refresh(catalog.clone() as Arc<dyn Catalog>))
            .collect();
        let built: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(catalog.snapshot_count(), 1);
        assert!(built.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_invalidate_forces_rebuild() {
        let catalog = catalog();
        let indexer = LibraryIndexer::new();
        indexer.current(&catalog).unwrap();
        indexer.invalidate();
        assert!(!indexer.is_built());
        indexer.current(&catalog).unwrap();
        assert_eq!(catalog.snapshot_count(), 2);
    }
}
