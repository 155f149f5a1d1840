//! Import and match command handlers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use margin_core::{
    fetch_into_store, CatalogId, ConfidenceResult, FieldStatus, ImportedBookMetadata,
    IndexHandle, Resolution,
};

use super::Session;
use crate::output::{truncate, Output, OutputFormat};
use crate::prompt;

/// How books below the auto-apply threshold are resolved
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Accept every proposed target without asking
    pub yes: bool,
    /// Target for books with no match at all
    pub default_target: Option<CatalogId>,
}

impl ImportOptions {
    /// Non-interactive answer for a book
    fn resolve(&self, result: &ConfidenceResult) -> Resolution {
        match (result.catalog_id, self.default_target) {
            (Some(id), _) if self.yes => Resolution::Target(id),
            (None, Some(fallback)) => Resolution::Target(fallback),
            _ => Resolution::Skip,
        }
    }
}

/// Fetch a reader app's annotations and merge them into the library
pub async fn import(
    session: &Session,
    reader: &str,
    only: Vec<String>,
    options: ImportOptions,
    output: &Output,
) -> Result<()> {
    // Warm the index while the reader app is read
    let warm = {
        let indexer = Arc::clone(&session.indexer);
        let catalog = session.catalog();
        tokio::task::spawn_blocking(move || indexer.current(catalog.as_ref()))
    };

    let app = session.readers.get(reader)?;
    let mut books = fetch_into_store(app, &session.store)
        .with_context(|| format!("Failed to fetch annotations from {}", reader))?;
    if !only.is_empty() {
        books.retain(|b| only.contains(&b.book_id));
    }

    if let Err(e) = warm.await.context("Index build task failed")? {
        debug!("Background index build failed: {}", e);
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; stopping after the current book");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let reconciler = session.reconciler();
    let interactive = output.should_prompt() && prompt::is_interactive() && !options.yes;

    let report = tokio::task::spawn_blocking(move || {
        let index = reconciler.index()?;
        reconciler.reconcile(
            &books,
            |book, result| {
                if interactive {
                    ask(book, result, &index, options.default_target, &cancel)
                } else {
                    options.resolve(result)
                }
            },
            &cancel,
        )
    })
    .await
    .context("Import task failed")??;

    output.print_report(&report)
}

/// Prompt for one book; quitting stops the rest of the batch
fn ask(
    book: &ImportedBookMetadata,
    result: &ConfidenceResult,
    index: &IndexHandle,
    default_target: Option<CatalogId>,
    cancel: &AtomicBool,
) -> Resolution {
    let resolution = prompt::choose_target(book, result, index, default_target);
    stop_on_quit(resolution, cancel)
}

fn stop_on_quit(resolution: Resolution, cancel: &AtomicBool) -> Resolution {
    if resolution == Resolution::Cancel {
        debug!("Import quit at the prompt");
        cancel.store(true, Ordering::SeqCst);
    }
    resolution
}

#[derive(Debug, Serialize)]
struct MatchRow {
    book_id: String,
    title: String,
    author: String,
    target: Option<CatalogId>,
    target_title: Option<String>,
    confidence: u8,
    fields: FieldStatus,
    auto_apply: bool,
}

/// Show how each book in a reader app would match, without merging
pub fn preview(session: &Session, reader: &str, output: &Output) -> Result<()> {
    let app = session.readers.get(reader)?;
    let reconciler = session.reconciler();
    let index = reconciler.index()?;
    let threshold = reconciler.policy().auto_apply_threshold;

    let rows: Vec<MatchRow> = app
        .installed_books()?
        .into_iter()
        .map(|book: ImportedBookMetadata| {
            let result = reconciler.confidence(&book, &index);
            MatchRow {
                target_title: result
                    .catalog_id
                    .and_then(|id| index.entry(id))
                    .map(|e| e.title.clone()),
                target: result.catalog_id,
                confidence: result.confidence,
                fields: result.field_status(),
                auto_apply: result.is_auto_apply(threshold),
                book_id: book.book_id,
                title: book.title,
                author: book.author,
            }
        })
        .collect();

    match output.format {
        OutputFormat::Json => output.json(&rows)?,
        OutputFormat::Quiet => {
            for row in &rows {
                println!(
                    "{}\t{}\t{}",
                    row.book_id,
                    row.target.map(|t| t.to_string()).unwrap_or_default(),
                    row.confidence
                );
            }
        }
        OutputFormat::Human => {
            for row in &rows {
                let flag = |matched: bool, name: &'static str| if matched { name } else { "-" };
                println!(
                    "{} | {} -> {} | {} [{} {} {}]{}",
                    truncate(&row.book_id, 12),
                    truncate(&row.title, 30),
                    row.target_title
                        .as_deref()
                        .map(|t| truncate(t, 30))
                        .unwrap_or_else(|| "(no match)".to_string()),
                    row.confidence,
                    flag(row.fields.title, "title"),
                    flag(row.fields.author, "author"),
                    flag(row.fields.uuid, "uuid"),
                    if row.auto_apply { "" } else { " needs confirmation" }
                );
            }
            println!("\n{} book(s), auto-apply at confidence {}", rows.len(), threshold);
        }
    }
    Ok(())
}
