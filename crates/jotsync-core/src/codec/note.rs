//! Note files.
//!
//! ```text
//! <!-- note-id: 5f0c2a4e-8d1b-4c3e-9f6a-1b2c3d4e5f60 -->
//! # Title
//! <!-- id: 0 | created: 1700000000000 | updated: 1700000000500 -->
//! ---
//! free-form markdown content
//! ---
//! ```
//!
//! Everything between the opening and the final closing delimiter is the
//! content, byte for byte. Content may itself contain `---` lines.

use super::{FIELD_DELIMITER, comment_body, parse_fields, single_line};
use crate::model::Note;
use uuid::Uuid;

const MARKER_KEY: &str = "note-id:";
const DELIMITER: &str = "---";

pub fn encode_note(note: &Note) -> String {
    let meta = [
        format!("id: {}", note.id),
        format!("created: {}", note.created),
        format!("updated: {}", note.updated),
    ]
    .join(FIELD_DELIMITER);

    format!(
        "<!-- {MARKER_KEY} {} -->\n# {}\n<!-- {meta} -->\n{DELIMITER}\n{}\n{DELIMITER}\n",
        note.uuid,
        single_line(&note.title),
        note.content
    )
}

/// Decode a note file.
///
/// A file without the UUID marker (written by an old version or by hand)
/// still decodes: it gets a fresh UUID and `legacy = true`. A missing
/// metadata line leaves timestamps at 0; missing delimiters make the rest
/// of the file the content. Returns `None` only when there is no title
/// heading at all.
pub fn decode_note(text: &str) -> Option<Note> {
    let mut rest = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut first = next_line(&mut rest)?;
    while first.trim().is_empty() {
        first = next_line(&mut rest)?;
    }

    let (uuid, legacy, title_line) = match parse_marker(first) {
        Some(uuid) => (uuid, false, next_line(&mut rest)?),
        None => (Uuid::new_v4(), true, first),
    };
    let title = title_line.strip_prefix('#')?.trim_start_matches('#');
    let title = title.strip_prefix(' ').unwrap_or(title);

    let mut note = Note {
        id: 0,
        uuid,
        title: title.to_string(),
        content: String::new(),
        created: 0,
        updated: 0,
        legacy,
    };

    let before_meta = rest;
    match next_line(&mut rest).and_then(parse_meta) {
        Some(fields) => {
            for (key, value) in fields {
                match key {
                    "id" => note.id = value.parse().unwrap_or(0),
                    "created" => note.created = value.parse().unwrap_or(0),
                    "updated" => note.updated = value.parse().unwrap_or(0),
                    _ => {}
                }
            }
        }
        None => rest = before_meta,
    }

    let before_delimiter = rest;
    if next_line(&mut rest).map(str::trim_end) != Some(DELIMITER) {
        rest = before_delimiter;
        note.content = rest.to_string();
        return Some(note);
    }

    note.content = strip_closing_delimiter(rest).to_string();
    Some(note)
}

/// Pop the next line off `rest` (without its line ending).
fn next_line<'a>(rest: &mut &'a str) -> Option<&'a str> {
    if rest.is_empty() {
        return None;
    }
    let (line, remainder) = match rest.find('\n') {
        Some(pos) => (&rest[..pos], &rest[pos + 1..]),
        None => (*rest, ""),
    };
    *rest = remainder;
    Some(line.strip_suffix('\r').unwrap_or(line))
}

fn parse_marker(line: &str) -> Option<Uuid> {
    let body = comment_body(line)?;
    let value = body.strip_prefix(MARKER_KEY)?;
    Uuid::parse_str(value.trim()).ok()
}

fn parse_meta(line: &str) -> Option<Vec<(&str, &str)>> {
    let fields = parse_fields(comment_body(line)?);
    fields
        .iter()
        .any(|(key, _)| matches!(*key, "created" | "updated"))
        .then_some(fields)
}

/// Content up to the final closing delimiter; the whole rest if absent.
fn strip_closing_delimiter(rest: &str) -> &str {
    for suffix in ["\n---\n", "\r\n---\r\n", "\n---\r\n", "\r\n---", "\n---"] {
        if let Some(content) = rest.strip_suffix(suffix) {
            return content;
        }
    }
    if rest.trim_end() == DELIMITER {
        return "";
    }
    rest
}
