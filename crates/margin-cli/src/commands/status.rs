//! Status command handler

use anyhow::Result;

use margin_core::Catalog;

use super::Session;
use crate::output::{Output, OutputFormat};

/// Show where things live and how much is stored
pub fn show(session: &Session, output: &Output) -> Result<()> {
    let config = &session.config;
    let library = config.library_path();
    let entries = session.catalog.get_entries().map(|e| e.len()).ok();

    let mut readers = Vec::new();
    for name in session.readers.names() {
        let books = session.store.books(name)?;
        let annotations: usize = books.iter().map(|b| b.count).sum();
        readers.push((name, books.len(), annotations));
    }

    match output.format {
        OutputFormat::Json => {
            let readers: Vec<_> = readers
                .iter()
                .map(|(name, books, annotations)| {
                    serde_json::json!({
                        "name": name,
                        "books": books,
                        "annotations": annotations
                    })
                })
                .collect();
            output.json(&serde_json::json!({
                "data_dir": config.data_dir,
                "database": config.sqlite_path(),
                "library": library,
                "library_entries": entries,
                "auto_apply_threshold": config.auto_apply_threshold,
                "destination": config.destination.to_string(),
                "readers": readers
            }))?;
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("margin status");
            println!("=============");
            println!();
            println!("Storage:");
            println!("  Data dir: {}", config.data_dir.display());
            println!("  Database: {}", config.sqlite_path().display());
            println!();
            println!("Library:");
            println!("  File:    {}", library.display());
            match entries {
                Some(n) => println!("  Books:   {}", n),
                None => println!("  Books:   (unavailable)"),
            }
            println!();
            println!("Import:");
            println!("  Auto-apply at confidence: {}", config.auto_apply_threshold);
            println!("  Destination:              {}", config.destination);
            if let Some(target) = config.news_clippings() {
                println!("  News clippings to:        {}", target);
            }
            println!();
            println!("Reader apps:");
            if readers.is_empty() {
                println!("  (none registered)");
            }
            for (name, books, annotations) in &readers {
                println!("  {}: {} book(s), {} annotation(s)", name, books, annotations);
            }
        }
    }

    Ok(())
}
