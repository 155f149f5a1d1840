//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::{Context, Result};
use serde::Serialize;

use margin_core::{BookStatus, BookSummary, ImportedBookMetadata, LibraryEntry, ReconcileReport};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print any serializable value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
        println!("{}", text);
        Ok(())
    }

    /// Print books that have annotations in a reader app
    pub fn print_annotated_books(
        &self,
        reader_app: &str,
        books: &[ImportedBookMetadata],
    ) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if books.is_empty() {
                    println!("No annotated books in {}.", reader_app);
                    return Ok(());
                }
                for book in books {
                    println!(
                        "{:<12} | {} | {} | {} annotation(s)",
                        truncate(&book.book_id, 12),
                        truncate(&book.title, 35),
                        truncate(&book.author, 25),
                        book.annotation_count
                    );
                }
                println!("\n{} book(s) fetched from {}", books.len(), reader_app);
            }
            OutputFormat::Json => self.json(books)?,
            OutputFormat::Quiet => {
                for book in books {
                    println!("{}", book.book_id);
                }
            }
        }
        Ok(())
    }

    /// Print stored annotation counts per book
    pub fn print_book_summaries(&self, reader_app: &str, books: &[BookSummary]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if books.is_empty() {
                    println!("No stored annotations for {}.", reader_app);
                    return Ok(());
                }
                for book in books {
                    println!(
                        "{:<12} | {:>4} | {}",
                        truncate(&book.book_id, 12),
                        book.count,
                        book.last_update.format("%Y-%m-%d %H:%M")
                    );
                }
                println!("\n{} book(s)", books.len());
            }
            OutputFormat::Json => self.json(books)?,
            OutputFormat::Quiet => {
                for book in books {
                    println!("{}", book.book_id);
                }
            }
        }
        Ok(())
    }

    /// Print catalog entries
    pub fn print_library(&self, entries: &[LibraryEntry]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if entries.is_empty() {
                    println!("Library is empty.");
                    return Ok(());
                }
                for entry in entries {
                    println!(
                        "{:>5} | {} | {}",
                        entry.id,
                        truncate(&entry.title, 40),
                        truncate(&entry.authors.join(" & "), 30)
                    );
                }
                println!("\n{} book(s)", entries.len());
            }
            OutputFormat::Json => self.json(entries)?,
            OutputFormat::Quiet => {
                for entry in entries {
                    println!("{}", entry.id);
                }
            }
        }
        Ok(())
    }

    /// Print the outcome of an import
    pub fn print_report(&self, report: &ReconcileReport) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                for book in &report.books {
                    let target = book
                        .target
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "{} | {} -> {} | confidence {} | {}",
                        status_label(&book.status),
                        truncate(&book.title, 35),
                        target,
                        book.confidence,
                        match &book.status {
                            BookStatus::Updated => format!("{} added", book.added),
                            BookStatus::Failed(reason) => reason.clone(),
                            _ => String::new(),
                        }
                    );
                }
                if !report.books.is_empty() {
                    println!();
                }
                println!("{}", report.summary());
            }
            OutputFormat::Json => self.json(report)?,
            OutputFormat::Quiet => {
                println!("{}", report.updated_count());
            }
        }
        Ok(())
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn status_label(status: &BookStatus) -> &'static str {
    match status {
        BookStatus::Updated => "updated  ",
        BookStatus::DuplicateSuppressed => "unchanged",
        BookStatus::Skipped => "skipped  ",
        BookStatus::Cancelled => "cancelled",
        BookStatus::Failed(_) => "FAILED   ",
    }
}

/// Truncate a string to max characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        // Multi-byte titles are cut on character boundaries
        assert_eq!(truncate("Der Zauberberg über alles", 15), "Der Zauberbe...");
    }

    #[test]
    fn test_status_labels_align() {
        let widths: Vec<usize> = [
            BookStatus::Updated,
            BookStatus::DuplicateSuppressed,
            BookStatus::Skipped,
            BookStatus::Cancelled,
            BookStatus::Failed(String::new()),
        ]
        .iter()
        .map(|s| status_label(s).len())
        .collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
    }
}
