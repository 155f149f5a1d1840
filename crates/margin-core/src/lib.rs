//! margin core library
//!
//! Merges reading annotations exported from reader apps into the books of a
//! library catalog, without duplicating highlights and without touching the
//! text people wrote around them.
//!
//! # Architecture
//!
//! - **Library index**: uuid and title lookup maps over a catalog snapshot,
//!   rebuilt when the catalog's modification token changes
//! - **Matcher**: scores imported book metadata against the index (0 to 5)
//! - **Annotation store**: SQLite archive of fetched annotations per reader
//!   app and book
//! - **Document model and merger**: parse, merge and render the annotation
//!   block stored on a catalog entry
//! - **Reconciler**: runs the above over a batch of books
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let store = Arc::new(AnnotationStore::open(&config)?);
//! let catalog: Arc<dyn Catalog> = Arc::new(FileCatalog::open(config.library_path()));
//!
//! let reader = JsonExportReader::load("kindle.json")?;
//! let books = fetch_into_store(&reader, &store)?;
//!
//! let reconciler = Reconciler::new(catalog, Arc::new(LibraryIndexer::new()), store,
//!     ReconcilePolicy::from_config(&config));
//! let report = reconciler.reconcile(&books, |_, _| Resolution::Skip, &AtomicBool::new(false))?;
//! println!("{}", report.summary());
//! ```
//!
//! # Modules
//!
//! - `config`: Application configuration
//! - `models`: Catalog entries, imported book metadata, annotation entries
//! - `library`: Catalog access and the library index
//! - `matcher`: Confidence scoring
//! - `document`: Annotation document parse/render
//! - `merge`: Annotation merging
//! - `storage`: Annotation store and SQLite schema
//! - `readers`: Reader-app registry and the JSON export reader
//! - `reconcile`: Batch reconciliation

pub mod config;
pub mod document;
pub mod library;
pub mod matcher;
pub mod merge;
pub mod models;
pub mod readers;
pub mod reconcile;
pub mod storage;

pub use config::{Config, Destination};
pub use document::{strip_annotations, AnnotationDocument, DocumentError, OuterContent};
pub use library::{
    Catalog, CatalogError, FileCatalog, IndexHandle, LibraryIndexer, MemoryCatalog,
    ModificationToken, TargetLocks,
};
pub use matcher::{
    describe_confidence, score, ConfidenceResult, FieldStatus, MAX_CONFIDENCE,
    RECOMMENDED_AUTO_APPLY,
};
pub use merge::{merge, merge_into_free_text, MergeOutcome};
pub use models::{AnnotationEntry, CatalogId, ImportedBookMetadata, LibraryEntry};
pub use readers::{fetch_into_store, JsonExportReader, ReaderApp, ReaderAppRegistry, ReaderError};
pub use reconcile::{
    BookOutcome, BookStatus, ReconcileError, ReconcilePolicy, ReconcileReport, Reconciler,
    Resolution,
};
pub use storage::{AnnotationStore, BookSummary, StorageError};
