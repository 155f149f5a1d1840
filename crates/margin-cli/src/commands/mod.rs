//! Command handlers

pub mod config;
pub mod import;
pub mod library;
pub mod reader;
pub mod status;
pub mod strip;

use std::sync::Arc;

use anyhow::Result;

use margin_core::{
    AnnotationStore, Catalog, Config, FileCatalog, LibraryIndexer, ReaderAppRegistry,
    ReconcilePolicy, Reconciler, StorageError,
};

/// Everything a command needs, opened once per invocation
pub struct Session {
    pub config: Config,
    pub store: Arc<AnnotationStore>,
    pub catalog: Arc<FileCatalog>,
    pub indexer: Arc<LibraryIndexer>,
    pub readers: ReaderAppRegistry,
}

impl Session {
    pub fn open(config: Config) -> Result<Self> {
        let store = AnnotationStore::open(&config).map_err(|e| {
            storage_failure(
                e,
                format!("Failed to open annotation store at {:?}", config.sqlite_path()),
            )
        })?;
        let catalog = FileCatalog::open(config.library_path());
        let readers = ReaderAppRegistry::from_config(&config);

        Ok(Self {
            config,
            store: Arc::new(store),
            catalog: Arc::new(catalog),
            indexer: Arc::new(LibraryIndexer::new()),
            readers,
        })
    }

    pub fn catalog(&self) -> Arc<dyn Catalog> {
        self.catalog.clone()
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.catalog(),
            Arc::clone(&self.indexer),
            Arc::clone(&self.store),
            ReconcilePolicy::from_config(&self.config),
        )
    }
}

/// Attach the storage error's hint, if any, to the message shown to the user
pub fn storage_failure(error: StorageError, what: String) -> anyhow::Error {
    let message = match error.hint() {
        Some(hint) => format!("{}\nHint: {}", what, hint),
        None => what,
    };
    anyhow::Error::new(error).context(message)
}
