//! Confidence matching
//!
//! Maps imported book metadata onto a catalog entry. The rules form an
//! ordered decision list; the first rule that holds decides the score.
//!
//! | confidence | rule |
//! |---|---|
//! | 5 | uuid known, title identical, author among indexed authors |
//! | 4 | uuid known, title identical or differing only by a qualifier |
//! | 3 | uuid known |
//! | 2 | title known, author among that title's authors |
//! | 1 | title known |
//! | 0 | nothing |
//!
//! Titles are compared after normalization (case, whitespace). A qualifier
//! is a trailing parenthesized or bracketed suffix such as "(Annotated)";
//! it is tolerated at level 4 only, so a full match still means the
//! catalog title was not edited.

use serde::Serialize;

use crate::library::IndexHandle;
use crate::models::{normalize, CatalogId, ImportedBookMetadata, LibraryEntry};

/// Highest confidence value
pub const MAX_CONFIDENCE: u8 = 5;

/// Lowest confidence applied without asking (uuid match)
pub const RECOMMENDED_AUTO_APPLY: u8 = 3;

/// Outcome of matching one imported book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfidenceResult {
    pub catalog_id: Option<CatalogId>,
    pub confidence: u8,
}

impl ConfidenceResult {
    pub fn no_match() -> Self {
        Self {
            catalog_id: None,
            confidence: 0,
        }
    }

    /// Which metadata fields matched, as implied by the confidence level
    pub fn field_status(&self) -> FieldStatus {
        FieldStatus {
            title: self.confidence >= 1 && self.confidence != 3,
            author: self.confidence == 5 || self.confidence == 2,
            uuid: self.confidence >= 3,
        }
    }

    pub fn is_auto_apply(&self, threshold: u8) -> bool {
        self.catalog_id.is_some() && self.confidence >= threshold
    }
}

/// Per-field match flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldStatus {
    pub title: bool,
    pub author: bool,
    pub uuid: bool,
}

/// Score an imported book against the index
pub fn score(imported: &ImportedBookMetadata, index: &IndexHandle) -> ConfidenceResult {
    let title = normalize(&imported.title);
    let author = normalize(&imported.author);
    let has_author = |authors: &[String]| {
        !author.is_empty() && authors.iter().any(|a| normalize(a) == author)
    };

    if let Some(record) = imported.uuid.as_deref().and_then(|u| index.by_uuid(u)) {
        let indexed = normalize(&record.title);
        let confidence = if indexed == title && has_author(&record.authors) {
            5
        } else if strip_qualifier(&indexed) == strip_qualifier(&title) {
            4
        } else {
            3
        };
        return ConfidenceResult {
            catalog_id: Some(record.id),
            confidence,
        };
    }

    match index.by_title(&title) {
        Some(record) if has_author(&record.authors) => ConfidenceResult {
            catalog_id: Some(record.id),
            confidence: 2,
        },
        Some(record) => ConfidenceResult {
            catalog_id: Some(record.id),
            confidence: 1,
        },
        None => ConfidenceResult::no_match(),
    }
}

/// Drop one trailing "(...)" or "[...]" qualifier from a normalized title
fn strip_qualifier(title: &str) -> &str {
    let trimmed = title.trim_end();
    let open = match trimmed.chars().last() {
        Some(')') => '(',
        Some(']') => '[',
        _ => return trimmed,
    };
    match trimmed.rfind(open) {
        Some(start) if start > 0 => trimmed[..start].trim_end(),
        _ => trimmed,
    }
}

/// Explain a confidence level for someone deciding whether to accept it
///
/// `proposed` is the catalog entry the annotations would be added to.
pub fn describe_confidence(
    confidence: u8,
    imported: &ImportedBookMetadata,
    proposed: &LibraryEntry,
) -> String {
    let title = || {
        format!(
            "TITLE MISMATCH:\n library: {}\n imported: {}\n",
            proposed.title, imported.title
        )
    };
    let author = || {
        format!(
            "AUTHOR MISMATCH:\n library: {}\n imported: {}\n",
            proposed.authors.join(", "),
            imported.author
        )
    };
    let uuid = || {
        format!(
            "UUID MISMATCH:\n library: {}\n imported: {}\n",
            proposed.uuid,
            imported.uuid.as_deref().unwrap_or("uuid unavailable")
        )
    };

    match confidence {
        0 => title() + &author() + &uuid(),
        1 => author() + &uuid(),
        2 => uuid(),
        3 => title() + &author(),
        4 => author(),
        _ => "Metadata matches".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ModificationToken;

    fn index() -> IndexHandle {
        IndexHandle::build(
            "lib",
            ModificationToken("1".into()),
            vec![
                LibraryEntry::new(42, "Dune", vec!["Herbert, Frank".to_string()], "U1"),
                LibraryEntry::new(
                    43,
                    "Good Omens",
                    vec!["Pratchett, Terry".to_string(), "Gaiman, Neil".to_string()],
                    "U2",
                ),
            ],
        )
    }

    fn book(uuid: Option<&str>, title: &str, author: &str) -> ImportedBookMetadata {
        let book = ImportedBookMetadata::new("kindle", "b1", title).with_author(author);
        match uuid {
            Some(u) => book.with_uuid(u),
            None => book,
        }
    }

    fn result(id: Option<CatalogId>, confidence: u8) -> ConfidenceResult {
        ConfidenceResult {
            catalog_id: id,
            confidence,
        }
    }

    #[test]
    fn test_scenario_full_match() {
        let r = score(&book(Some("U1"), "Dune", "Herbert, Frank"), &index());
        assert_eq!(r, result(Some(42), 5));
    }

    #[test]
    fn test_scenario_title_edited() {
        let r = score(&book(Some("U1"), "Dune (Annotated)", "Herbert, Frank"), &index());
        assert_eq!(r, result(Some(42), 4));
    }

    #[test]
    fn test_strip_qualifier() {
        assert_eq!(strip_qualifier("dune (annotated)"), "dune");
        assert_eq!(strip_qualifier("dune [kindle edition]"), "dune");
        assert_eq!(strip_qualifier("dune"), "dune");
        // A title that is only a parenthetical keeps its text
        assert_eq!(strip_qualifier("(untitled)"), "(untitled)");
    }

    #[test]
    fn test_scenario_unknown_uuid_title_and_author() {
        let r = score(&book(Some("U9"), "Dune", "Herbert, Frank"), &index());
        assert_eq!(r, result(Some(42), 2));
    }

    #[test]
    fn test_full_rule_table() {
        let index = index();
        // (uuid, title, author) -> expected
        let cases: &[(Option<&str>, &str, &str, Option<CatalogId>, u8)] = &[
            // uuid in index
            (Some("U1"), "Dune", "Herbert, Frank", Some(42), 5),
            (Some("U1"), "Dune", "Someone Else", Some(42), 4),
            (Some("U1"), "Dune", "", Some(42), 4),
            (Some("U1"), "Dune (Annotated)", "Someone Else", Some(42), 4),
            (Some("U1"), "Other", "Herbert, Frank", Some(42), 3),
            (Some("U1"), "Other", "Someone Else", Some(42), 3),
            // uuid not in index
            (Some("U9"), "Dune", "Herbert, Frank", Some(42), 2),
            (Some("U9"), "Dune", "Someone Else", Some(42), 1),
            (Some("U9"), "Other", "Herbert, Frank", None, 0),
            (Some("U9"), "Other", "Someone Else", None, 0),
            // uuid absent
            (None, "Dune", "Herbert, Frank", Some(42), 2),
            (None, "Dune", "Someone Else", Some(42), 1),
            (None, "Dune", "", Some(42), 1),
            (None, "Other", "Herbert, Frank", None, 0),
            (None, "Other", "Someone Else", None, 0),
        ];

        for (uuid, title, author, id, confidence) in cases {
            let r = score(&book(*uuid, title, author), &index);
            assert_eq!(
                r,
                result(*id, *confidence),
                "uuid={:?} title={} author={}",
                uuid,
                title,
                author
            );
        }
    }

    #[test]
    fn test_author_must_be_member_not_substring() {
        let r = score(&book(Some("U2"), "Good Omens", "Gaiman, Neil"), &index());
        assert_eq!(r.confidence, 5);

        let r = score(&book(Some("U2"), "Good Omens", "Gaiman"), &index());
        assert_eq!(r.confidence, 4);
    }

    #[test]
    fn test_comparison_ignores_case_and_spacing() {
        let r = score(&book(Some(" U1 "), "  dune", "HERBERT,  Frank"), &index());
        assert_eq!(r, result(Some(42), 5));
    }

    #[test]
    fn test_field_status() {
        assert_eq!(
            result(Some(1), 5).field_status(),
            FieldStatus { title: true, author: true, uuid: true }
        );
        assert_eq!(
            result(Some(1), 3).field_status(),
            FieldStatus { title: false, author: false, uuid: true }
        );
        assert_eq!(
            result(Some(1), 2).field_status(),
            FieldStatus { title: true, author: true, uuid: false }
        );
        assert_eq!(
            result(None, 0).field_status(),
            FieldStatus { title: false, author: false, uuid: false }
        );
    }

    #[test]
    fn test_auto_apply_threshold() {
        assert!(result(Some(1), 3).is_auto_apply(RECOMMENDED_AUTO_APPLY));
        assert!(!result(Some(1), 2).is_auto_apply(RECOMMENDED_AUTO_APPLY));
        // No target means nothing to apply, whatever the threshold
        assert!(!result(None, 0).is_auto_apply(0));
    }

    #[test]
    fn test_describe_confidence() {
        let entry = LibraryEntry::new(42, "Dune", vec!["Herbert, Frank".to_string()], "U1");
        let imported = book(None, "Dune Messiah", "F. Herbert");

        assert_eq!(describe_confidence(5, &imported, &entry), "Metadata matches");

        let four = describe_confidence(4, &imported, &entry);
        assert!(four.starts_with("AUTHOR MISMATCH"));
        assert!(four.contains("F. Herbert"));

        let two = describe_confidence(2, &imported, &entry);
        assert!(two.contains("uuid unavailable"));

        let zero = describe_confidence(0, &imported, &entry);
        assert!(zero.contains("TITLE MISMATCH"));
        assert!(zero.contains("AUTHOR MISMATCH"));
        assert!(zero.contains("UUID MISMATCH"));
    }
}
