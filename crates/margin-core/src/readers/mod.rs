//! Reader-app integrations
//!
//! A reader app is anything that can list the books it holds and the
//! annotations made in them. Implementations are registered once at startup
//! in a [`ReaderAppRegistry`]; the rest of the crate only sees the
//! [`ReaderApp`] trait.
//!
//! Built in: [`JsonExportReader`], which reads a normalized JSON export.

mod json_export;

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::document::render_block;
use crate::models::{AnnotationEntry, ImportedBookMetadata};
use crate::storage::{AnnotationStore, StorageError};

pub use json_export::{ExportFile, ExportedAnnotation, ExportedBook, JsonExportReader};

/// Errors raised by reader apps
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Unknown reader app '{0}'")]
    UnknownApp(String),

    #[error("Cannot read export file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid export file '{path}': {source}")]
    InvalidExport {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Book '{book_id}' not found in {app}")]
    BookNotFound { app: String, book_id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Capability interface every reader app provides
pub trait ReaderApp: Send + Sync {
    /// Registry name, e.g. `"kindle"`
    fn name(&self) -> &str;

    /// Books known to the reader app
    fn installed_books(&self) -> Result<Vec<ImportedBookMetadata>, ReaderError>;

    /// Current annotations for one book, in the order the app lists them
    fn active_annotations(&self, book_id: &str) -> Result<Vec<AnnotationEntry>, ReaderError>;

    /// Render one book's annotations as a standalone annotation document
    fn generate_document(&self, book_id: &str) -> Result<String, ReaderError> {
        let entries = self.active_annotations(book_id)?;
        Ok(render_block(&entries))
    }
}

/// Reader apps available to this process
#[derive(Default)]
pub struct ReaderAppRegistry {
    apps: Vec<Box<dyn ReaderApp>>,
}

impl ReaderAppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every export file listed in the configuration
    ///
    /// A file that cannot be loaded is logged and left out; the remaining
    /// apps are still registered.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for path in &config.reader_exports {
            match JsonExportReader::load(path) {
                Ok(reader) => registry.register(Box::new(reader)),
                Err(e) => warn!("Skipping reader export {:?}: {}", path, e),
            }
        }
        registry
    }

    /// Register an app; a later registration replaces one with the same name
    pub fn register(&mut self, app: Box<dyn ReaderApp>) {
        if let Some(pos) = self.apps.iter().position(|a| a.name() == app.name()) {
            warn!("Replacing reader app '{}'", app.name());
            self.apps[pos] = app;
        } else {
            debug!("Registered reader app '{}'", app.name());
            self.apps.push(app);
        }
    }

    pub fn get(&self, name: &str) -> Result<&dyn ReaderApp, ReaderError> {
        self.apps
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
            .ok_or_else(|| ReaderError::UnknownApp(name.to_string()))
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.apps.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

/// Copy a reader app's annotations into the store
///
/// Returns metadata for every book that has annotations, with
/// `annotation_count` set to the number fetched. Books without annotations
/// are left out.
pub fn fetch_into_store(
    app: &dyn ReaderApp,
    store: &AnnotationStore,
) -> Result<Vec<ImportedBookMetadata>, ReaderError> {
    let mut annotated = Vec::new();

    for mut book in app.installed_books()? {
        let entries = app.active_annotations(&book.book_id)?;
        if entries.is_empty() {
            continue;
        }
        store.put_entries(app.name(), &book.book_id, &entries)?;
        book.annotation_count = entries.len();
        annotated.push(book);
    }

    info!(
        "Fetched annotations for {} book(s) from {}",
        annotated.len(),
        app.name()
    );
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    struct FakeReader {
        name: &'static str,
    }

    impl ReaderApp for FakeReader {
        fn name(&self) -> &str {
            self.name
        }

        fn installed_books(&self) -> Result<Vec<ImportedBookMetadata>, ReaderError> {
            Ok(vec![
                ImportedBookMetadata::new(self.name, "b1", "Dune"),
                ImportedBookMetadata::new(self.name, "b2", "Unread"),
            ])
        }

        fn active_annotations(&self, book_id: &str) -> Result<Vec<AnnotationEntry>, ReaderError> {
            let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
            match book_id {
                "b1" => Ok(vec![
                    AnnotationEntry::new("p10", "The spice must flow.", ts),
                    AnnotationEntry::new("p20", "Fear is the mind-killer.", ts),
                ]),
                "b2" => Ok(vec![]),
                other => Err(ReaderError::BookNotFound {
                    app: self.name.to_string(),
                    book_id: other.to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ReaderAppRegistry::new();
        registry.register(Box::new(FakeReader { name: "kindle" }));
        registry.register(Box::new(FakeReader { name: "kobo" }));

        assert_eq!(registry.names(), vec!["kindle", "kobo"]);
        assert_eq!(registry.get("kobo").unwrap().name(), "kobo");
        assert!(matches!(
            registry.get("nook"),
            Err(ReaderError::UnknownApp(name)) if name == "nook"
        ));
    }

    #[test]
    fn test_registry_replaces_same_name() {
        let mut registry = ReaderAppRegistry::new();
        registry.register(Box::new(FakeReader { name: "kindle" }));
        registry.register(Box::new(FakeReader { name: "kindle" }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_from_config_skips_unloadable_exports() {
        let config = Config {
            reader_exports: vec![PathBuf::from("/definitely/not/here.json")],
            ..Config::default()
        };
        assert!(ReaderAppRegistry::from_config(&config).is_empty());
    }

    #[test]
    fn test_default_generate_document() {
        let reader = FakeReader { name: "kindle" };
        let doc = reader.generate_document("b1").unwrap();
        let (entries, outer) = crate::document::parse(&doc).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(outer.is_blank());
    }

    #[test]
    fn test_fetch_into_store() {
        let store = AnnotationStore::open_in_memory().unwrap();
        let reader = FakeReader { name: "kindle" };

        let books = fetch_into_store(&reader, &store).unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].book_id, "b1");
        assert_eq!(books[0].annotation_count, 2);
        assert_eq!(store.count("kindle", "b1").unwrap(), 2);
        assert_eq!(store.count("kindle", "b2").unwrap(), 0);

        // Fetching again replaces rather than duplicates
        fetch_into_store(&reader, &store).unwrap();
        assert_eq!(store.count("kindle", "b1").unwrap(), 2);
    }
}
