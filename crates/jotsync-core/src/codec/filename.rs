//! File names derived from record titles.
//!
//! Names are cosmetic: the UUID inside the file is the identity. Derivation
//! is deterministic so re-saving an unchanged record never renames it.

use std::collections::HashMap;
use uuid::Uuid;

const MAX_STEM_CHARS: usize = 50;
const UUID_PREFIX_LEN: usize = 8;
const EXTENSION: &str = ".md";
const ILLEGAL: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Title reduced to a safe file stem.
///
/// Drops illegal and control characters, turns spaces into underscores,
/// caps the length, and prepends `prefix` if the result doesn't start with
/// an alphanumeric character.
pub fn sanitize_stem(title: &str, prefix: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .filter(|c| !ILLEGAL.contains(c) && !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .take(MAX_STEM_CHARS)
        .collect();
    let cleaned = cleaned.trim_end_matches(['.', '_']);

    if cleaned.is_empty() {
        return format!("{prefix}untitled");
    }
    if cleaned.chars().next().is_some_and(char::is_alphanumeric) {
        cleaned.to_string()
    } else {
        format!("{prefix}{cleaned}")
    }
}

/// File name for a note.
///
/// `existing` maps file names already on disk to the UUID stored in them.
/// A name held by a different record gets the first eight characters of
/// this record's UUID appended, then a counter if that is taken too.
pub fn derive_filename(title: &str, uuid: Uuid, existing: &HashMap<String, Uuid>) -> String {
    derive_with_prefix(title, uuid, existing, "note_")
}

/// File name for a task list's backing file.
pub fn derive_list_filename(name: &str, uuid: Uuid, existing: &HashMap<String, Uuid>) -> String {
    derive_with_prefix(name, uuid, existing, "list_")
}

fn derive_with_prefix(
    title: &str,
    uuid: Uuid,
    existing: &HashMap<String, Uuid>,
    prefix: &str,
) -> String {
    let taken = |name: &str| {
        existing
            .iter()
            .any(|(other, owner)| other.eq_ignore_ascii_case(name) && *owner != uuid)
    };

    let stem = sanitize_stem(title, prefix);
    let plain = format!("{stem}{EXTENSION}");
    if !taken(&plain) {
        return plain;
    }

    let short = &uuid.simple().to_string()[..UUID_PREFIX_LEN];
    let tagged = format!("{stem}_{short}");
    let candidate = format!("{tagged}{EXTENSION}");
    if !taken(&candidate) {
        return candidate;
    }

    let mut n = 2;
    loop {
        let candidate = format!("{tagged}_{n}{EXTENSION}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize_stem("Meeting notes: Q3/Q4?", "note_"), "Meeting_notes_Q3Q4");
        assert_eq!(sanitize_stem("  ", "note_"), "note_untitled");
        assert_eq!(sanitize_stem("#tag", "note_"), "note_#tag");
        assert_eq!(sanitize_stem("Café", "note_"), "Café");
        assert_eq!(sanitize_stem(&"x".repeat(80), "note_").len(), 50);
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let uuid = Uuid::new_v4();
        let existing = HashMap::from([("Ideas.md".to_string(), uuid)]);
        let a = derive_filename("Ideas", uuid, &existing);
        let b = derive_filename("Ideas", uuid, &existing);
        assert_eq!(a, "Ideas.md");
        assert_eq!(a, b);
    }

    #[test]
    fn test_collision_appends_uuid_prefix_then_counter() {
        let ours = Uuid::parse_str("abcdef01-2345-6789-abcd-ef0123456789").unwrap();
        let other = Uuid::new_v4();
        let third = Uuid::new_v4();

        let mut existing = HashMap::from([("ideas.md".to_string(), other)]);
        assert_eq!(derive_filename("Ideas", ours, &existing), "Ideas_abcdef01.md");

        existing.insert("Ideas_abcdef01.md".to_string(), third);
        assert_eq!(derive_filename("Ideas", ours, &existing), "Ideas_abcdef01_2.md");
    }

    #[test]
    fn test_list_prefix() {
        let existing = HashMap::new();
        assert_eq!(derive_list_filename("_work", Uuid::new_v4(), &existing), "list__work.md");
    }
}
