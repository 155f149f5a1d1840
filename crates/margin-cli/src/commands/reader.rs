//! Reader-app command handlers

use anyhow::{Context, Result};

use margin_core::fetch_into_store;

use super::Session;
use crate::output::{Output, OutputFormat};

/// List registered reader apps
pub fn list(session: &Session, output: &Output) -> Result<()> {
    let names = session.readers.names();

    match output.format {
        OutputFormat::Json => output.json(&names)?,
        OutputFormat::Quiet => {
            for name in &names {
                println!("{}", name);
            }
        }
        OutputFormat::Human => {
            if names.is_empty() {
                println!("No reader apps registered.");
                println!("Add export files with:");
                println!("  margin config set reader_exports /path/to/export.json");
                return Ok(());
            }
            for name in &names {
                println!("{}", name);
            }
        }
    }
    Ok(())
}

/// Copy a reader app's annotations into the store
pub fn fetch(session: &Session, reader: &str, output: &Output) -> Result<()> {
    let app = session.readers.get(reader)?;
    let books = fetch_into_store(app, &session.store)
        .with_context(|| format!("Failed to fetch annotations from {}", reader))?;
    output.print_annotated_books(reader, &books)
}

/// List books with stored annotations
pub fn books(session: &Session, reader: &str, output: &Output) -> Result<()> {
    let books = session.store.books(reader)?;
    output.print_book_summaries(reader, &books)
}

/// Print the stored annotations of one book as a document
pub fn show(session: &Session, reader: &str, book_id: &str, output: &Output) -> Result<()> {
    let app = session.readers.get(reader)?;
    let metadata = app
        .installed_books()?
        .into_iter()
        .find(|b| b.book_id == book_id)
        .with_context(|| format!("Book '{}' not found in {}", book_id, reader))?;
    let document = session
        .store
        .render_as_document(reader, book_id, &metadata)?;

    match output.format {
        OutputFormat::Json => output.json(&serde_json::json!({
            "book": metadata,
            "count": session.store.count(reader, book_id)?,
            "document": document,
        }))?,
        OutputFormat::Quiet | OutputFormat::Human => print!("{}", document),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::session;
    use tempfile::TempDir;

    #[test]
    fn test_fetch_stores_annotations() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let output = Output::new(OutputFormat::Quiet);

        fetch(&session, "kindle", &output).unwrap();
        assert_eq!(session.store.count("kindle", "B1").unwrap(), 2);
        assert_eq!(session.store.count("kindle", "B2").unwrap(), 1);

        books(&session, "kindle", &output).unwrap();
        show(&session, "kindle", "B1", &output).unwrap();
    }

    #[test]
    fn test_unknown_reader() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let output = Output::new(OutputFormat::Quiet);

        assert!(fetch(&session, "nook", &output).is_err());
        assert!(show(&session, "kindle", "B9", &output).is_err());
    }
}
