//! Plain-text on-disk formats for tasks, notes and list metadata.
//!
//! Decoders are permissive: a damaged line or file yields `None` (or an
//! empty list) instead of an error, so one bad record never blocks the rest
//! of a load. Encoders are deterministic so that saving an unchanged record
//! produces a byte-identical file.

pub mod filename;
pub mod metadata;
pub mod note;
pub mod task;

pub use filename::{derive_filename, derive_list_filename, sanitize_stem};
pub use metadata::{
    decode_list_metadata, decode_list_metadata_or_empty, encode_list_metadata,
    normalize_metadata, scan_json_arrays,
};
pub use note::{decode_note, encode_note};
pub use task::{decode_task, decode_task_list, encode_task, encode_task_list};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No valid JSON array found")]
    NoValidArray,
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Separator between `key: value` pairs inside an annotation comment.
pub(crate) const FIELD_DELIMITER: &str = " | ";

/// Split `key: value | key: value` into trimmed pairs.
///
/// Entries without a colon are dropped.
pub(crate) fn parse_fields(annotation: &str) -> Vec<(&str, &str)> {
    annotation
        .split(FIELD_DELIMITER.trim())
        .filter_map(|pair| {
            let (key, value) = pair.split_once(':')?;
            Some((key.trim(), value.trim()))
        })
        .collect()
}

/// Body of an HTML comment (`<!-- body -->`), trimmed.
pub(crate) fn comment_body(text: &str) -> Option<&str> {
    let inner = text.trim().strip_prefix("<!--")?.strip_suffix("-->")?;
    Some(inner.trim())
}

/// Single-line form of a title. Newlines would split the record.
pub(crate) fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields("id: 3 | uuid: abc | junk | updated: 10");
        assert_eq!(fields, vec![("id", "3"), ("uuid", "abc"), ("updated", "10")]);
    }

    #[test]
    fn test_comment_body() {
        assert_eq!(comment_body("  <!-- a: 1 -->"), Some("a: 1"));
        assert_eq!(comment_body("<!-- unterminated"), None);
    }
}
