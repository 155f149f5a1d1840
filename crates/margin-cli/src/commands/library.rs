//! Library catalog command handlers

use anyhow::{Context, Result};

use margin_core::Catalog;

use super::Session;
use crate::output::Output;

/// Add a book to the file-backed library
pub fn add(
    session: &Session,
    title: String,
    authors: Vec<String>,
    uuid: Option<String>,
    output: &Output,
) -> Result<()> {
    let uuid = uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let entry = session
        .catalog
        .add_entry(&title, authors, &uuid)
        .with_context(|| format!("Failed to add '{}' to the library", title))?;

    if output.is_json() {
        output.json(&entry)?;
    } else if output.is_quiet() {
        println!("{}", entry.id);
    } else {
        output.success(&format!("Added [{}] {} ({})", entry.id, entry.title, entry.uuid));
    }
    Ok(())
}

/// List library entries
pub fn list(session: &Session, output: &Output) -> Result<()> {
    let entries = session
        .catalog
        .get_entries()
        .context("Failed to read the library")?;
    output.print_library(&entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::session;
    use crate::output::OutputFormat;
    use tempfile::TempDir;

    #[test]
    fn test_add_assigns_ids_and_uuids() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let output = Output::new(OutputFormat::Quiet);

        add(&session, "Dune".into(), vec!["Herbert, Frank".into()], Some("U1".into()), &output)
            .unwrap();
        add(&session, "Emma".into(), vec![], None, &output).unwrap();

        let entries = session.catalog.get_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].uuid, "U1");
        assert_eq!(entries[1].id, 2);
        assert!(uuid::Uuid::parse_str(&entries[1].uuid).is_ok());

        list(&session, &output).unwrap();
    }
}
