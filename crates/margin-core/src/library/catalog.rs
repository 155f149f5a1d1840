//! Catalog access
//!
//! `Catalog` is implemented by whatever owns the books. Two implementations
//! ship with margin: `FileCatalog`, a JSON file used by the CLI, and
//! `MemoryCatalog`, used in tests and when embedding the library.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{CatalogId, LibraryEntry};
use crate::storage::{atomic_write, StorageError};

/// Errors raised by a catalog
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog could not be read at all
    #[error("Library catalog unavailable: {0}")]
    Unavailable(String),

    /// No entry with the given id
    #[error("No catalog entry with id {0}")]
    NotFound(CatalogId),

    /// Persisting a change failed
    #[error("Failed to write library catalog: {0}")]
    Write(#[from] StorageError),
}

/// Opaque token that changes whenever the catalog changes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModificationToken(pub String);

impl std::fmt::Display for ModificationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The host library, as seen by margin
pub trait Catalog: Send + Sync {
    /// Identity of the library currently open
    fn library_id(&self) -> String;

    /// Snapshot of every entry
    fn get_entries(&self) -> Result<Vec<LibraryEntry>, CatalogError>;

    /// Token compared against the one recorded at index build time
    fn modification_timestamp(&self) -> Result<ModificationToken, CatalogError>;

    /// Stored annotation document for an entry (`None` if never written)
    fn get_document(&self, id: CatalogId) -> Result<Option<String>, CatalogError>;

    /// Replace the stored annotation document for an entry
    fn set_document(&self, id: CatalogId, raw_document: &str) -> Result<(), CatalogError>;

    /// Per-entry locks shared by everyone writing documents to this catalog
    ///
    /// A read, merge and write of one entry's document happens while holding
    /// that entry's lock.
    fn target_locks(&self) -> &TargetLocks;
}

/// One mutex per catalog id
#[derive(Debug, Default)]
pub struct TargetLocks {
    locks: Mutex<HashMap<CatalogId, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_target(&self, id: CatalogId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }
}

// ==================== In-memory catalog ====================

#[derive(Debug, Default)]
struct MemoryState {
    books: BTreeMap<CatalogId, StoredBook>,
    revision: u64,
    unavailable: bool,
    snapshots: usize,
}

/// Catalog held entirely in memory
#[derive(Debug)]
pub struct MemoryCatalog {
    library_id: String,
    state: Mutex<MemoryState>,
    locks: TargetLocks,
}

impl MemoryCatalog {
    pub fn new(library_id: impl Into<String>) -> Self {
        Self {
            library_id: library_id.into(),
            state: Mutex::new(MemoryState::default()),
            locks: TargetLocks::new(),
        }
    }

    /// Add or replace an entry
    pub fn insert(&self, entry: LibraryEntry) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let document = state.books.get(&entry.id).and_then(|b| b.document.clone());
        state
            .books
            .insert(entry.id, StoredBook { entry, document });
        state.revision += 1;
    }

    /// Add an entry with an existing document
    pub fn insert_with_document(&self, entry: LibraryEntry, document: impl Into<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.books.insert(
            entry.id,
            StoredBook {
                entry,
                document: Some(document.into()),
            },
        );
        state.revision += 1;
    }

    /// Simulate the catalog going away
    pub fn set_unavailable(&self, unavailable: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.unavailable = unavailable;
    }

    /// Current document of an entry
    pub fn document(&self, id: CatalogId) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.books.get(&id).and_then(|b| b.document.clone())
    }

    /// Number of full snapshots taken so far
    pub fn snapshot_count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshots
    }
}

impl Catalog for MemoryCatalog {
    fn library_id(&self) -> String {
        self.library_id.clone()
    }

    fn get_entries(&self) -> Result<Vec<LibraryEntry>, CatalogError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            return Err(CatalogError::Unavailable(self.library_id.clone()));
        }
        state.snapshots += 1;
        Ok(state.books.values().map(|b| b.entry.clone()).collect())
    }

    fn modification_timestamp(&self) -> Result<ModificationToken, CatalogError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.unavailable {
            return Err(CatalogError::Unavailable(self.library_id.clone()));
        }
        Ok(ModificationToken(state.revision.to_string()))
    }

    fn get_document(&self, id: CatalogId) -> Result<Option<String>, CatalogError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .books
            .get(&id)
            .map(|b| b.document.clone())
            .ok_or(CatalogError::NotFound(id))
    }

    fn set_document(&self, id: CatalogId, raw_document: &str) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let book = state.books.get_mut(&id).ok_or(CatalogError::NotFound(id))?;
        book.document = Some(raw_document.to_string());
        state.revision += 1;
        Ok(())
    }

    fn target_locks(&self) -> &TargetLocks {
        &self.locks
    }
}

// ==================== File-backed catalog ====================

/// A catalog entry together with its annotation document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredBook {
    #[serde(flatten)]
    entry: LibraryEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    document: Option<String>,
}

/// On-disk layout of a `FileCatalog`
#[derive(Debug, Default, Serialize, Deserialize)]
struct LibraryFile {
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    entries: Vec<StoredBook>,
}

/// Catalog stored as a single JSON file
///
/// Every write bumps `revision` and goes through an atomic rename, so a
/// reader never sees a half-written library. Target locks cover one
/// `FileCatalog` value; share it through an `Arc` rather than opening the
/// same file twice.
#[derive(Debug)]
pub struct FileCatalog {
    path: PathBuf,
    write_lock: Mutex<()>,
    locks: TargetLocks,
}

impl FileCatalog {
    /// Open a catalog file (it need not exist yet)
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            locks: TargetLocks::new(),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a new entry, assigning the next free id
    pub fn add_entry(
        &self,
        title: &str,
        authors: Vec<String>,
        uuid: &str,
    ) -> Result<LibraryEntry, CatalogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read_or_default()?;
        let id = file
            .entries
            .iter()
            .map(|b| b.entry.id)
            .max()
            .unwrap_or(0)
            + 1;
        let entry = LibraryEntry::new(id, title, authors, uuid);
        file.entries.push(StoredBook {
            entry: entry.clone(),
            document: None,
        });
        self.write(&mut file)?;
        Ok(entry)
    }

    fn read_or_default(&self) -> Result<LibraryFile, CatalogError> {
        if !self.path.exists() {
            return Ok(LibraryFile::default());
        }
        self.read()
    }

    fn read(&self) -> Result<LibraryFile, CatalogError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            CatalogError::Unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CatalogError::Unavailable(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write(&self, file: &mut LibraryFile) -> Result<(), CatalogError> {
        file.revision += 1;
        let json = serde_json::to_vec_pretty(file)
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;
        atomic_write(&self.path, &json)?;
        debug!("Wrote library {:?} at revision {}", self.path, file.revision);
        Ok(())
    }
}

impl Catalog for FileCatalog {
    fn library_id(&self) -> String {
        self.path.display().to_string()
    }

    fn get_entries(&self) -> Result<Vec<LibraryEntry>, CatalogError> {
        Ok(self.read()?.entries.into_iter().map(|b| b.entry).collect())
    }

    fn modification_timestamp(&self) -> Result<ModificationToken, CatalogError> {
        let file = self.read()?;
        let modified = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Ok(ModificationToken(format!("{}:{}", file.revision, modified)))
    }

    fn get_document(&self, id: CatalogId) -> Result<Option<String>, CatalogError> {
        self.read()?
            .entries
            .into_iter()
            .find(|b| b.entry.id == id)
            .map(|b| b.document)
            .ok_or(CatalogError::NotFound(id))
    }

    fn set_document(&self, id: CatalogId, raw_document: &str) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;
        let book = file
            .entries
            .iter_mut()
            .find(|b| b.entry.id == id)
            .ok_or(CatalogError::NotFound(id))?;
        book.document = Some(raw_document.to_string());
        self.write(&mut file)
    }

    fn target_locks(&self) -> &TargetLocks {
        &self.locks
    }
}
