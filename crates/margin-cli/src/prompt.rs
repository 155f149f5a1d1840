//! Interactive prompts
//!
//! Confirmation for destructive commands and target selection for books
//! that did not match confidently enough to merge on their own.

use anyhow::Result;
use std::io::{self, BufRead, Write};

use margin_core::{
    describe_confidence, CatalogId, ConfidenceResult, IndexHandle, ImportedBookMetadata,
    Resolution,
};

/// Prompt for confirmation
///
/// Returns true if user confirms, false otherwise.
/// In non-interactive mode (no TTY), returns false.
pub fn confirm(prompt: &str) -> Result<bool> {
    if !is_interactive() {
        return Ok(false);
    }

    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    Ok(input == "y" || input == "yes")
}

pub fn is_interactive() -> bool {
    atty::is(atty::Stream::Stdin)
}

/// Ask which catalog entry should receive a book's annotations
///
/// `default_target` is offered for books that matched nothing. `Cancel`
/// means the user quit; reading from stdin fails closed the same way.
pub fn choose_target(
    book: &ImportedBookMetadata,
    result: &ConfidenceResult,
    index: &IndexHandle,
    default_target: Option<CatalogId>,
) -> Resolution {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    ask_target(book, result, index, default_target, &mut input, &mut out)
        .unwrap_or(Resolution::Cancel)
}

fn ask_target(
    book: &ImportedBookMetadata,
    result: &ConfidenceResult,
    index: &IndexHandle,
    default_target: Option<CatalogId>,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> io::Result<Resolution> {
    writeln!(out)?;
    writeln!(
        out,
        "'{}' by {} (confidence {} of 5)",
        book.title,
        if book.author.is_empty() {
            "unknown author"
        } else {
            book.author.as_str()
        },
        result.confidence
    )?;

    if result.catalog_id.is_none() {
        writeln!(out, "No matching book in the library.")?;
    }
    let proposed = result
        .catalog_id
        .or(default_target)
        .and_then(|id| index.entry(id));
    match proposed {
        Some(entry) => {
            let label = if result.catalog_id.is_some() {
                "Proposed"
            } else {
                "Default target"
            };
            writeln!(out, "{}: [{}] {}", label, entry.id, entry.title)?;
            write!(out, "{}", describe_confidence(result.confidence, book, entry))?;
            writeln!(out)?;
            write!(
                out,
                "Merge into [{}]? [y]es / [n]o, skip book / <id> / [q]uit import: ",
                entry.id
            )?;
        }
        None => {
            write!(out, "Merge into which id? <id> / [n]o, skip book / [q]uit import: ")?;
        }
    }
    out.flush()?;

    loop {
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(Resolution::Cancel);
        }
        let answer = line.trim().to_lowercase();

        match answer.as_str() {
            "y" | "yes" => {
                if let Some(entry) = proposed {
                    return Ok(Resolution::Target(entry.id));
                }
            }
            "" | "n" | "no" => return Ok(Resolution::Skip),
            "q" | "quit" => return Ok(Resolution::Cancel),
            other => {
                if let Ok(id) = other.parse() {
                    if index.entry(id).is_some() {
                        return Ok(Resolution::Target(id));
                    }
                    writeln!(out, "No library entry with id {}.", id)?;
                }
            }
        }
        write!(out, "Please answer y, n, q or a library id: ")?;
        out.flush()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use margin_core::{LibraryEntry, ModificationToken};

    fn index() -> IndexHandle {
        IndexHandle::build(
            "lib",
            ModificationToken("1".into()),
            vec![
                LibraryEntry::new(42, "Dune", vec!["Herbert, Frank".to_string()], "U1"),
                LibraryEntry::new(43, "Emma", vec![], "U2"),
            ],
        )
    }

    fn ask(answers: &str, result: ConfidenceResult) -> (Resolution, String) {
        let book = ImportedBookMetadata::new("kindle", "b1", "Dune");
        let mut input = answers.as_bytes();
        let mut out = Vec::new();
        let resolution =
            ask_target(&book, &result, &index(), None, &mut input, &mut out).unwrap();
        (resolution, String::from_utf8(out).unwrap())
    }

    fn title_only() -> ConfidenceResult {
        ConfidenceResult {
            catalog_id: Some(42),
            confidence: 1,
        }
    }

    #[test]
    fn test_accept_proposed() {
        let (resolution, shown) = ask("y\n", title_only());
        assert_eq!(resolution, Resolution::Target(42));
        assert!(shown.contains("AUTHOR MISMATCH"));
    }

    #[test]
    fn test_pick_other_id() {
        let (resolution, _) = ask("43\n", title_only());
        assert_eq!(resolution, Resolution::Target(43));
    }

    #[test]
    fn test_unknown_id_asks_again() {
        let (resolution, shown) = ask("99\nn\n", title_only());
        assert_eq!(resolution, Resolution::Skip);
        assert!(shown.contains("No library entry with id 99"));
    }

    #[test]
    fn test_no_match_cannot_accept() {
        let (resolution, _) = ask("y\nq\n", ConfidenceResult::no_match());
        assert_eq!(resolution, Resolution::Cancel);
    }

    #[test]
    fn test_default_target_offered_for_no_match() {
        let book = ImportedBookMetadata::new("kindle", "b1", "Solaris");
        let mut input = "y\n".as_bytes();
        let mut out = Vec::new();
        let resolution = ask_target(
            &book,
            &ConfidenceResult::no_match(),
            &index(),
            Some(43),
            &mut input,
            &mut out,
        )
        .unwrap();

        assert_eq!(resolution, Resolution::Target(43));
        let shown = String::from_utf8(out).unwrap();
        assert!(shown.contains("No matching book"));
        assert!(shown.contains("Default target: [43] Emma"));
    }

    #[test]
    fn test_default_target_ignored_when_proposed() {
        let book = ImportedBookMetadata::new("kindle", "b1", "Dune");
        let mut input = "y\n".as_bytes();
        let mut out = Vec::new();
        let resolution =
            ask_target(&book, &title_only(), &index(), Some(43), &mut input, &mut out).unwrap();
        assert_eq!(resolution, Resolution::Target(42));
    }

    #[test]
    fn test_end_of_input_cancels() {
        let (resolution, _) = ask("", title_only());
        assert_eq!(resolution, Resolution::Cancel);
    }
}
