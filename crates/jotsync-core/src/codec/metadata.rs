//! `todo_lists/metadata.json`: a JSON array with one element per list.
//!
//! This file is the most frequent conflict target, and a bad merge can leave
//! two arrays written back to back. `normalize_metadata` recovers from that
//! by scanning for every top-level bracketed array and unioning them.

use super::{CodecError, Result};
use crate::model::TaskList;
use std::collections::HashSet;
use tracing::debug;

pub fn encode_list_metadata(lists: &[TaskList]) -> String {
    let mut json = serde_json::to_string_pretty(lists).unwrap_or_else(|_| "[]".to_string());
    json.push('\n');
    json
}

/// Strict decode. Whitespace-only input is an empty array.
pub fn decode_list_metadata(json: &str) -> Result<Vec<TaskList>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(json)?)
}

/// Decode, falling back to repair, then to an empty list.
pub fn decode_list_metadata_or_empty(json: &str) -> Vec<TaskList> {
    match normalize_metadata(json) {
        Ok(lists) => lists,
        Err(e) => {
            debug!("Discarding unreadable list metadata: {}", e);
            Vec::new()
        }
    }
}

/// Turn possibly-concatenated metadata into one array.
///
/// Valid input is returned as is. Otherwise every top-level array found by
/// `scan_json_arrays` that parses is merged in order; the first occurrence
/// of a list id wins.
pub fn normalize_metadata(text: &str) -> Result<Vec<TaskList>> {
    let strict_err = match decode_list_metadata(text) {
        Ok(lists) => return Ok(lists),
        Err(e) => e,
    };

    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    let mut any_parsed = false;

    for candidate in scan_json_arrays(text) {
        match serde_json::from_str::<Vec<TaskList>>(candidate) {
            Ok(lists) => {
                any_parsed = true;
                for list in lists {
                    if seen.insert(list.id) {
                        merged.push(list);
                    }
                }
            }
            Err(e) => debug!("Skipping unparseable metadata fragment: {}", e),
        }
    }

    if any_parsed {
        debug!("Repaired list metadata ({}); {} lists", strict_err, merged.len());
        Ok(merged)
    } else {
        Err(CodecError::NoValidArray)
    }
}

/// Every balanced top-level `[...]` substring, in order.
///
/// Brackets inside JSON strings are ignored. An unterminated array at the
/// end of the input is dropped.
pub fn scan_json_arrays(text: &str) -> Vec<&str> {
    let mut arrays = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' if depth > 0 => in_string = true,
            '[' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            ']' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    arrays.push(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    arrays
}
