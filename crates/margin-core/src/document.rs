//! Stored annotation documents
//!
//! A catalog entry's annotation field holds free-form user content with at
//! most one annotation block embedded in it:
//!
//! ```text
//! ...user text...
//! <div class="user_annotations">
//! <div class="annotation" data-key="…" data-location="…" data-created="…" data-style="…">
//! <p class="highlight">…</p>
//! <p class="note">…</p>
//! </div>
//! </div>
//! ...more user text...
//! ```
//!
//! The block is located by its opening marker, then read as XML until its
//! matching close tag. Everything before and after it is kept verbatim as
//! `OuterContent`. Rendering is canonical, so `parse(render(o, b))` gives
//! back exactly `(b, o)`. Outer content may not contain the opening marker,
//! since the block could no longer be found unambiguously; `render` refuses
//! it.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::models::AnnotationEntry;

/// Opening marker of the annotation block
pub const BLOCK_OPEN: &str = r#"<div class="user_annotations">"#;

/// Closing tag of the annotation block
const BLOCK_CLOSE: &str = "</div>";

/// Divider placed once between free text and the first annotation block
pub const DIVIDER: &str = r#"<hr class="annotations_divider" />"#;

const BLOCK_CLASS: &str = "user_annotations";
const ENTRY_CLASS: &str = "annotation";
const HIGHLIGHT_CLASS: &str = "highlight";
const NOTE_CLASS: &str = "note";

/// Errors that can occur while reading a stored document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    /// The annotation block exists but cannot be read safely
    #[error("Malformed annotation document: {reason}")]
    Malformed { reason: String },

    /// Outer content holds the opening marker, so the block would be ambiguous
    #[error("Text around the annotations contains the annotation block marker")]
    MarkerInContent,
}

fn malformed(reason: impl std::fmt::Display) -> DocumentError {
    DocumentError::Malformed {
        reason: reason.to_string(),
    }
}

/// User content surrounding the annotation block
///
/// Neither part may contain `BLOCK_OPEN`. Content produced by `parse` never
/// does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OuterContent {
    pub before: String,
    pub after: String,
}

impl OuterContent {
    pub fn new(before: impl Into<String>, after: impl Into<String>) -> Self {
        Self {
            before: before.into(),
            after: after.into(),
        }
    }

    /// Whether there is no user content besides whitespace
    pub fn is_blank(&self) -> bool {
        self.before.trim().is_empty() && self.after.trim().is_empty()
    }

    /// Whether either part contains the block's opening marker
    pub fn contains_marker(&self) -> bool {
        self.before.contains(BLOCK_OPEN) || self.after.contains(BLOCK_OPEN)
    }
}

/// A parsed document: outer content plus annotation entries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationDocument {
    pub outer: OuterContent,
    pub entries: Vec<AnnotationEntry>,
    has_block: bool,
}

impl AnnotationDocument {
    /// Parse a stored document; an empty string is an empty document
    pub fn parse(raw: &str) -> Result<Self, DocumentError> {
        let Some(start) = raw.find(BLOCK_OPEN) else {
            return Ok(Self {
                outer: OuterContent::new(raw, ""),
                entries: Vec::new(),
                has_block: false,
            });
        };

        let (entries, consumed) = read_block(&raw[start..])?;
        let end = start + consumed;

        if raw[end..].contains(BLOCK_OPEN) {
            return Err(malformed("more than one annotation block"));
        }

        Ok(Self {
            outer: OuterContent::new(&raw[..start], &raw[end..]),
            entries,
            has_block: true,
        })
    }

    /// Whether the source document already contained an annotation block
    pub fn has_block(&self) -> bool {
        self.has_block
    }

    /// Serialize back to the stored form
    pub fn render(&self) -> Result<String, DocumentError> {
        render(&self.outer, &self.entries)
    }
}

/// Split a stored document into its annotation entries and outer content
pub fn parse(raw: &str) -> Result<(Vec<AnnotationEntry>, OuterContent), DocumentError> {
    let doc = AnnotationDocument::parse(raw)?;
    Ok((doc.entries, doc.outer))
}

/// Render outer content around an annotation block
pub fn render(outer: &OuterContent, entries: &[AnnotationEntry]) -> Result<String, DocumentError> {
    if outer.contains_marker() {
        return Err(DocumentError::MarkerInContent);
    }
    let mut out = String::with_capacity(outer.before.len() + outer.after.len() + 256);
    out.push_str(&outer.before);
    out.push_str(&render_block(entries));
    out.push_str(&outer.after);
    Ok(out)
}

/// Render just the annotation block
pub fn render_block(entries: &[AnnotationEntry]) -> String {
    let mut out = String::from(BLOCK_OPEN);
    out.push('\n');
    for entry in entries {
        out.push_str(&format!(
            r#"<div class="{}" data-key="{}" data-location="{}" data-created="{}""#,
            ENTRY_CLASS,
            escape_attr(&entry.identity_key),
            escape_attr(&entry.location_marker),
            entry
                .created_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        ));
        if let Some(style) = &entry.style {
            out.push_str(&format!(r#" data-style="{}""#, escape_attr(style)));
        }
        out.push_str(">\n");
        out.push_str(&format!(
            "<p class=\"{}\">{}</p>\n",
            HIGHLIGHT_CLASS,
            escape_text(&entry.text)
        ));
        if let Some(note) = &entry.note {
            out.push_str(&format!(
                "<p class=\"{}\">{}</p>\n",
                NOTE_CLASS,
                escape_text(note)
            ));
        }
        out.push_str("</div>\n");
    }
    out.push_str(BLOCK_CLOSE);
    out
}

/// Remove the annotation block and divider, keeping user content
pub fn strip_annotations(raw: &str) -> Result<String, DocumentError> {
    let doc = AnnotationDocument::parse(raw)?;
    let mut out = doc.outer.before;
    out.push_str(&doc.outer.after);
    Ok(remove_divider(&out))
}

fn remove_divider(content: &str) -> String {
    content
        .replace(&format!("\n{}\n", DIVIDER), "")
        .replace(&format!("{}\n", DIVIDER), "")
        .replace(DIVIDER, "")
}

fn escape_text(s: &str) -> String {
    escape(s).replace('\r', "&#13;")
}

fn escape_attr(s: &str) -> String {
    escape(s)
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;")
}

// ==================== Block reader ====================

/// Read the block at the start of `input`; returns entries and bytes consumed
fn read_block(input: &str) -> Result<(Vec<AnnotationEntry>, usize), DocumentError> {
    let mut reader = Reader::from_str(input);

    match next_event(&mut reader)? {
        Event::Start(e) if has_class(&e, BLOCK_CLASS)? => {}
        _ => return Err(malformed("annotation block marker is not an element")),
    }

    let mut entries = Vec::new();
    loop {
        match next_event(&mut reader)? {
            Event::Start(e) if has_class(&e, ENTRY_CLASS)? => {
                entries.push(read_entry(&mut reader, &e)?);
            }
            Event::End(e) if e.name().as_ref() == b"div" => {
                return Ok((entries, reader.buffer_position() as usize));
            }
            Event::Eof => return Err(malformed("annotation block is not closed")),
            other => {
                return Err(malformed(format!(
                    "unexpected content in annotation block: {:?}",
                    other
                )))
            }
        }
    }
}

fn read_entry(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<AnnotationEntry, DocumentError> {
    let mut key = None;
    let mut location = None;
    let mut created = None;
    let mut style = None;

    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        match attr.key.as_ref() {
            b"data-key" => key = Some(value),
            b"data-location" => location = Some(value),
            b"data-created" => created = Some(value),
            b"data-style" => style = Some(value),
            _ => {}
        }
    }

    let identity_key = key.ok_or_else(|| malformed("annotation without data-key"))?;
    let location_marker =
        location.ok_or_else(|| malformed("annotation without data-location"))?;
    let created = created.ok_or_else(|| malformed("annotation without data-created"))?;
    let created_at = DateTime::parse_from_rfc3339(&created)
        .map_err(|e| malformed(format!("bad timestamp '{}': {}", created, e)))?
        .with_timezone(&Utc);

    let mut text = None;
    let mut note = None;
    loop {
        let (class, content) = match next_event(reader)? {
            Event::Start(e) if e.name().as_ref() == b"p" => {
                let class = class_of(&e)?;
                (class, read_text(reader)?)
            }
            Event::Empty(e) if e.name().as_ref() == b"p" => (class_of(&e)?, String::new()),
            Event::End(e) if e.name().as_ref() == b"div" => break,
            Event::Eof => return Err(malformed("annotation entry is not closed")),
            other => {
                return Err(malformed(format!(
                    "unexpected content in annotation '{}': {:?}",
                    identity_key, other
                )))
            }
        };
        let slot = match class.as_deref() {
            Some(HIGHLIGHT_CLASS) => &mut text,
            Some(NOTE_CLASS) => &mut note,
            _ => return Err(malformed("paragraph without a known class")),
        };
        if slot.replace(content).is_some() {
            return Err(malformed(format!(
                "duplicate paragraph in annotation '{}'",
                identity_key
            )));
        }
    }

    let text = text.ok_or_else(|| malformed("annotation without highlight text"))?;
    Ok(AnnotationEntry {
        identity_key,
        text,
        location_marker,
        note,
        created_at,
        style,
    })
}

/// Collect text up to the closing `</p>`
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, DocumentError> {
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(malformed)?),
            Event::CData(c) => text.push_str(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(e) if e.name().as_ref() == b"p" => return Ok(text),
            Event::Eof => return Err(malformed("paragraph is not closed")),
            other => {
                return Err(malformed(format!(
                    "unexpected markup inside paragraph: {:?}",
                    other
                )))
            }
        }
    }
}

/// Next event that carries structure (skips whitespace and comments)
fn next_event<'a>(reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>, DocumentError> {
    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => continue,
            Event::Comment(_) => continue,
            event => return Ok(event),
        }
    }
}

/// Whether `e` is a `<div>` carrying exactly the given class
fn has_class(e: &BytesStart<'_>, class: &str) -> Result<bool, DocumentError> {
    if e.name().as_ref() != b"div" {
        return Ok(false);
    }
    Ok(class_of(e)?.as_deref() == Some(class))
}

fn class_of(e: &BytesStart<'_>) -> Result<Option<String>, DocumentError> {
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        if attr.key.as_ref() == b"class" {
            return Ok(Some(attr.unescape_value().map_err(malformed)?.into_owned()));
        }
    }
    Ok(None)
}
