//! Annotation merging
//!
//! Folds newly fetched annotation entries into a stored document:
//!
//! - Entries already present (by identity key) are skipped; the stored copy
//!   wins
//! - New entries are appended in the order the source presented them
//! - Content outside the annotation block is left untouched
//!
//! When nothing new arrives the stored document is returned byte-for-byte,
//! which makes a repeated import a no-op.

use std::collections::HashSet;

use tracing::debug;

use crate::document::{AnnotationDocument, DocumentError, DIVIDER};
use crate::models::AnnotationEntry;

/// Result of merging into one document
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The document to store
    pub document: String,
    /// Entries appended by this merge
    pub added: usize,
    /// Entries in the block after the merge
    pub total: usize,
}

impl MergeOutcome {
    /// Every incoming entry was already present
    pub fn is_unchanged(&self) -> bool {
        self.added == 0
    }
}

/// Append entries whose identity key is not yet in the document
///
/// Returns the number appended. Duplicates inside `incoming` collapse onto
/// their first occurrence.
pub fn merge_entries(doc: &mut AnnotationDocument, incoming: &[AnnotationEntry]) -> usize {
    let mut seen: HashSet<String> = doc
        .entries
        .iter()
        .map(|e| e.identity_key.clone())
        .collect();

    let before = doc.entries.len();
    for entry in incoming {
        if seen.insert(entry.identity_key.clone()) {
            doc.entries.push(entry.clone());
        }
    }
    doc.entries.len() - before
}

/// Merge into a field dedicated to annotations
pub fn merge(existing: &str, incoming: &[AnnotationEntry]) -> Result<MergeOutcome, DocumentError> {
    let mut doc = AnnotationDocument::parse(existing)?;
    let added = merge_entries(&mut doc, incoming);
    finish(existing, &doc, added)
}

/// Merge into a free-form field shared with user text
///
/// The first time a block is created after existing user text, a divider
/// is placed between them. A divider already present is never repeated.
pub fn merge_into_free_text(
    existing: &str,
    incoming: &[AnnotationEntry],
) -> Result<MergeOutcome, DocumentError> {
    let mut doc = AnnotationDocument::parse(existing)?;
    let added = merge_entries(&mut doc, incoming);

    if added > 0
        && !doc.has_block()
        && !doc.outer.before.trim().is_empty()
        && !existing.contains(DIVIDER)
    {
        let before = &mut doc.outer.before;
        if !before.ends_with('\n') {
            before.push('\n');
        }
        before.push_str(DIVIDER);
        before.push('\n');
    }

    finish(existing, &doc, added)
}

fn finish(
    existing: &str,
    doc: &AnnotationDocument,
    added: usize,
) -> Result<MergeOutcome, DocumentError> {
    let total = doc.entries.len();
    if added == 0 {
        debug!("No new annotations; document unchanged");
        return Ok(MergeOutcome {
            document: existing.to_string(),
            added,
            total,
        });
    }
    debug!("Appended {} annotation(s), {} total", added, total);
    Ok(MergeOutcome {
        document: doc.render()?,
        added,
        total,
    })
}
