//! Reconciliation of a batch of imported books
//!
//! For each book: score it against the library index, merge automatically
//! when the confidence reaches the configured threshold, otherwise ask the
//! caller's resolver for a target. Books are processed independently; a
//! failure on one is recorded in the report and the batch moves on. Only
//! an unreadable catalog stops the whole batch, since matching without an
//! index could send annotations to the wrong book.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Config, Destination};
use crate::document::{strip_annotations, DocumentError};
use crate::library::{Catalog, CatalogError, IndexHandle, LibraryIndexer};
use crate::matcher::{score, ConfidenceResult, MAX_CONFIDENCE, RECOMMENDED_AUTO_APPLY};
use crate::merge::{merge, merge_into_free_text, MergeOutcome};
use crate::models::{CatalogId, ImportedBookMetadata};
use crate::storage::{AnnotationStore, StorageError};

/// Errors raised while reconciling
///
/// `IndexUnavailable` aborts a batch. The others are recorded against a
/// single book in the report.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Library index unavailable: {0}")]
    IndexUnavailable(#[source] CatalogError),

    #[error("Catalog entry {target} has a malformed annotation document: {source}")]
    MalformedDocument {
        target: CatalogId,
        #[source]
        source: DocumentError,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Caller's answer for a book below the auto-apply threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Merge into this catalog entry
    Target(CatalogId),
    /// Leave this book out
    Skip,
    /// The person deciding backed out; skip this book
    Cancel,
}

/// What happened to one book
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum BookStatus {
    /// New annotations were written
    Updated,
    /// Every annotation was already present
    DuplicateSuppressed,
    /// The resolver chose not to import this book
    Skipped,
    /// The resolver cancelled, or the batch was stopped before this book
    Cancelled,
    Failed(String),
}

/// Per-book entry in a report
#[derive(Debug, Serialize)]
pub struct BookOutcome {
    pub reader_app: String,
    pub book_id: String,
    pub title: String,
    pub target: Option<CatalogId>,
    pub confidence: u8,
    /// Merged without asking the resolver
    pub auto_applied: bool,
    #[serde(flatten)]
    pub status: BookStatus,
    /// Annotations appended to the target document
    pub added: usize,
    #[serde(skip)]
    pub error: Option<ReconcileError>,
}

impl BookOutcome {
    fn new(book: &ImportedBookMetadata) -> Self {
        Self {
            reader_app: book.reader_app.clone(),
            book_id: book.book_id.clone(),
            title: book.title.clone(),
            target: None,
            confidence: 0,
            auto_applied: false,
            status: BookStatus::Cancelled,
            added: 0,
            error: None,
        }
    }

    fn fail(&mut self, error: ReconcileError) {
        warn!("Failed to merge '{}': {}", self.title, error);
        self.status = BookStatus::Failed(error.to_string());
        self.error = Some(error);
    }
}

/// Result of a reconciliation pass
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    pub books: Vec<BookOutcome>,
    /// The cancellation flag stopped the batch early
    pub stopped: bool,
}

impl ReconcileReport {
    /// Number of books whose documents were written
    pub fn updated_count(&self) -> usize {
        self.count(|s| matches!(s, BookStatus::Updated))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|s| matches!(s, BookStatus::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &BookOutcome> {
        self.books
            .iter()
            .filter(|b| matches!(b.status, BookStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&BookStatus) -> bool) -> usize {
        self.books.iter().filter(|b| pred(&b.status)).count()
    }

    /// One-line summary for people
    pub fn summary(&self) -> String {
        let updated = self.updated_count();
        let mut summary = format!(
            "Annotations from {} book{} added.",
            updated,
            if updated == 1 { "" } else { "s" }
        );
        let failed = self.failed_count();
        if failed > 0 {
            summary.push_str(&format!(" {} failed.", failed));
        }
        if self.stopped {
            summary.push_str(" Stopped before the end of the batch.");
        }
        summary
    }
}

/// Settings that shape a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub auto_apply_threshold: u8,
    pub destination: Destination,
    pub news_clippings_target: Option<CatalogId>,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            auto_apply_threshold: RECOMMENDED_AUTO_APPLY,
            destination: Destination::default(),
            news_clippings_target: None,
        }
    }
}

impl ReconcilePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            auto_apply_threshold: config.auto_apply_threshold.min(MAX_CONFIDENCE),
            destination: config.destination,
            news_clippings_target: config.news_clippings(),
        }
    }
}

/// Runs reconciliation passes against one catalog
pub struct Reconciler {
    catalog: Arc<dyn Catalog>,
    indexer: Arc<LibraryIndexer>,
    store: Arc<AnnotationStore>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        indexer: Arc<LibraryIndexer>,
        store: Arc<AnnotationStore>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            catalog,
            indexer,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Current library index, waiting for any build in progress
    pub fn index(&self) -> Result<Arc<IndexHandle>, ReconcileError> {
        self.indexer
            .current(self.catalog.as_ref())
            .map_err(ReconcileError::IndexUnavailable)
    }

    /// Confidence for one book, with news clippings routing applied
    pub fn confidence(&self, book: &ImportedBookMetadata, index: &IndexHandle) -> ConfidenceResult {
        if let Some(target) = self.policy.news_clippings_target {
            if book.is_news() {
                debug!("'{}' routed to news clippings entry {}", book.title, target);
                return ConfidenceResult {
                    catalog_id: Some(target),
                    confidence: MAX_CONFIDENCE,
                };
            }
        }
        score(book, index)
    }

    /// Merge stored annotations for every book in `batch`
    ///
    /// `resolve_target` is called for each book below the auto-apply
    /// threshold. `cancel` is checked before each book; once set, the
    /// remaining books are reported as cancelled.
    pub fn reconcile<F>(
        &self,
        batch: &[ImportedBookMetadata],
        mut resolve_target: F,
        cancel: &AtomicBool,
    ) -> Result<ReconcileReport, ReconcileError>
    where
        F: FnMut(&ImportedBookMetadata, &ConfidenceResult) -> Resolution,
    {
        let index = self.index()?;
        let mut report = ReconcileReport::default();

        for book in batch {
            let mut outcome = BookOutcome::new(book);

            if report.stopped || cancel.load(Ordering::SeqCst) {
                if !report.stopped {
                    info!("Reconciliation cancelled");
                }
                report.stopped = true;
                report.books.push(outcome);
                continue;
            }

            let result = self.confidence(book, &index);
            outcome.confidence = result.confidence;

            let target = if result.is_auto_apply(self.policy.auto_apply_threshold) {
                outcome.auto_applied = true;
                result.catalog_id
            } else {
                debug!(
                    "'{}' needs confirmation (confidence {})",
                    book.title, result.confidence
                );
                match resolve_target(book, &result) {
                    Resolution::Target(id) => Some(id),
                    Resolution::Skip => {
                        outcome.target = result.catalog_id;
                        outcome.status = BookStatus::Skipped;
                        report.books.push(outcome);
                        continue;
                    }
                    Resolution::Cancel => {
                        outcome.target = result.catalog_id;
                        outcome.status = BookStatus::Cancelled;
                        report.books.push(outcome);
                        continue;
                    }
                }
            };

            let Some(target) = target else {
                outcome.status = BookStatus::Skipped;
                report.books.push(outcome);
                continue;
            };
            outcome.target = Some(target);

            info!(
                "'{}' -> catalog entry {} (confidence {}{})",
                book.title,
                target,
                result.confidence,
                if outcome.auto_applied { ", automatic" } else { "" }
            );

            match self.merge_book(book, target) {
                Ok(merged) if merged.is_unchanged() => {
                    outcome.status = BookStatus::DuplicateSuppressed;
                }
                Ok(merged) => {
                    outcome.status = BookStatus::Updated;
                    outcome.added = merged.added;
                }
                Err(e) => outcome.fail(e),
            }
            report.books.push(outcome);
        }

        info!("{}", report.summary());
        Ok(report)
    }

    /// Read, merge and write one target under its lock
    fn merge_book(
        &self,
        book: &ImportedBookMetadata,
        target: CatalogId,
    ) -> Result<MergeOutcome, ReconcileError> {
        let incoming = self.store.entries(&book.reader_app, &book.book_id)?;

        let lock = self.catalog.target_locks().for_target(target);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self.catalog.get_document(target)?.unwrap_or_default();
        let merged = match self.policy.destination {
            Destination::FreeText => merge_into_free_text(&existing, &incoming),
            Destination::Structured => merge(&existing, &incoming),
        }
        .map_err(|source| ReconcileError::MalformedDocument { target, source })?;

        if !merged.is_unchanged() {
            self.catalog.set_document(target, &merged.document)?;
        }
        Ok(merged)
    }

    /// Remove the annotation block from every catalog document
    ///
    /// Returns the number of documents changed. Documents that do not parse
    /// are left alone.
    pub fn strip_all(&self) -> Result<usize, ReconcileError> {
        let entries = self
            .catalog
            .get_entries()
            .map_err(ReconcileError::IndexUnavailable)?;
        let mut changed = 0;

        for entry in entries {
            let lock = self.catalog.target_locks().for_target(entry.id);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

            let Some(existing) = self.catalog.get_document(entry.id)? else {
                continue;
            };
            match strip_annotations(&existing) {
                Ok(stripped) if stripped != existing => {
                    self.catalog.set_document(entry.id, &stripped)?;
                    changed += 1;
                }
                Ok(_) => {}
                Err(e) => warn!("Leaving '{}' untouched: {}", entry.title, e),
            }
        }

        info!("Removed annotations from {} catalog entries", changed);
        Ok(changed)
    }
}
