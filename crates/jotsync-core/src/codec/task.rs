//! Task-list files: one markdown checkbox line per task.
//!
//! ```text
//! - [x] Buy milk <!-- id: 3 | uuid: 5f0c… | created: 1700000000000 | updated: 1700000000500 | repeat: none | fired: false -->
//! ```
//!
//! Markdown viewers hide the trailing comment, so the file still reads as a
//! plain checklist while carrying every non-title field.

use super::{FIELD_DELIMITER, comment_body, parse_fields, single_line};
use crate::model::{JOTSYNC_NAMESPACE, RepeatInterval, Task, next_task_id, observe_task_id};
use std::collections::HashMap;
use uuid::Uuid;

/// Encode a task as one line (without trailing newline).
pub fn encode_task(task: &Task) -> String {
    let mut fields = vec![
        format!("id: {}", task.id),
        format!("uuid: {}", task.uuid),
        format!("created: {}", task.created),
        format!("updated: {}", task.updated),
    ];
    if let Some(reminder) = task.reminder {
        fields.push(format!("reminder: {reminder}"));
    }
    fields.push(format!("repeat: {}", task.repeat));
    if let Some(original) = task.original_reminder {
        fields.push(format!("original_reminder: {original}"));
    }
    if let Some(next) = task.next_reminder {
        fields.push(format!("next_reminder: {next}"));
    }
    fields.push(format!("fired: {}", task.fired));

    let checkbox = if task.completed { "[x]" } else { "[ ]" };
    format!(
        "- {checkbox} {} <!-- {} -->",
        single_line(&task.title),
        fields.join(FIELD_DELIMITER)
    )
}

/// Decode one line. Returns `None` for anything that isn't a task line.
///
/// Missing optional fields fall back to defaults. A bare checkbox line
/// without annotation gets a UUID derived from its title, so both sides of
/// a conflicting merge agree on its identity.
pub fn decode_task(line: &str) -> Option<Task> {
    let mut task = decode_line(line)?;
    if task.uuid.is_nil() {
        task.uuid = bare_uuid(&task.title, 0);
    }
    Some(task)
}

/// UUID for an unannotated line: the title plus how many bare lines with
/// the same title came before it in the file.
fn bare_uuid(title: &str, occurrence: usize) -> Uuid {
    if occurrence == 0 {
        return Uuid::new_v5(&JOTSYNC_NAMESPACE, title.as_bytes());
    }
    // A decoded title never contains a newline.
    let name = format!("{title}\n{occurrence}");
    Uuid::new_v5(&JOTSYNC_NAMESPACE, name.as_bytes())
}

/// Parse a line, leaving the UUID nil when the line carries none.
fn decode_line(line: &str) -> Option<Task> {
    let line = line.trim_end_matches(['\r', '\n']).trim_start();
    let rest = line.strip_prefix("- ").or_else(|| line.strip_prefix("* "))?;
    let (completed, rest) = if let Some(rest) = rest.strip_prefix("[ ] ") {
        (false, rest)
    } else if let Some(rest) = rest
        .strip_prefix("[x] ")
        .or_else(|| rest.strip_prefix("[X] "))
    {
        (true, rest)
    } else {
        return None;
    };

    let (title, annotation) = split_annotation(rest);
    if title.trim().is_empty() && annotation.is_none() {
        return None;
    }

    let mut task = Task {
        id: 0,
        uuid: Uuid::nil(),
        title: title.to_string(),
        completed,
        created: 0,
        updated: 0,
        reminder: None,
        repeat: RepeatInterval::None,
        original_reminder: None,
        next_reminder: None,
        fired: false,
    };
    let mut id = None;

    for (key, value) in annotation.map(parse_fields).unwrap_or_default() {
        match key {
            "id" => id = value.parse::<i64>().ok(),
            "uuid" => task.uuid = Uuid::parse_str(value).ok()?,
            "created" => task.created = parse_millis(value),
            "updated" => task.updated = parse_millis(value),
            "reminder" => task.reminder = parse_optional_millis(value),
            "repeat" => task.repeat = value.parse().unwrap_or_default(),
            "original_reminder" => task.original_reminder = parse_optional_millis(value),
            "next_reminder" => task.next_reminder = parse_optional_millis(value),
            "fired" => task.fired = value.eq_ignore_ascii_case("true"),
            _ => {}
        }
    }

    task.id = match id {
        Some(id) => {
            observe_task_id(id);
            id
        }
        None => next_task_id(),
    };
    Some(task)
}

/// Encode a whole list file, one task per line.
pub fn encode_task_list(tasks: &[Task]) -> String {
    let mut out = String::new();
    for task in tasks {
        out.push_str(&encode_task(task));
        out.push('\n');
    }
    out
}

/// Decode a list file, skipping lines that don't parse.
///
/// Bare lines sharing a title are told apart by their order in the file.
pub fn decode_task_list(text: &str) -> Vec<Task> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    text.lines()
        .filter_map(decode_line)
        .map(|mut task| {
            if task.uuid.is_nil() {
                let occurrence = seen.entry(task.title.clone()).or_default();
                task.uuid = bare_uuid(&task.title, *occurrence);
                *occurrence += 1;
            }
            task
        })
        .collect()
}

/// Split `Title <!-- fields -->` into title and comment body.
fn split_annotation(rest: &str) -> (&str, Option<&str>) {
    if !rest.trim_end().ends_with("-->") {
        return (rest, None);
    }
    let Some(start) = rest.rfind("<!--") else {
        return (rest, None);
    };
    let title = &rest[..start];
    let title = title.strip_suffix(' ').unwrap_or(title);
    (title, comment_body(&rest[start..]))
}

fn parse_millis(value: &str) -> i64 {
    value.parse().unwrap_or(0)
}

/// Non-positive reminder times mean "unset".
fn parse_optional_millis(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task {
            id: 42,
            uuid: Uuid::parse_str("5f0c2a4e-8d1b-4c3e-9f6a-1b2c3d4e5f60").unwrap(),
            title: "Buy milk | eggs".to_string(),
            completed: true,
            created: 1_700_000_000_000,
            updated: 1_700_000_000_500,
            reminder: Some(1_700_000_100_000),
            repeat: RepeatInterval::Weekly,
            original_reminder: Some(1_700_000_100_000),
            next_reminder: None,
            fired: true,
        }
    }

    #[test]
    fn test_roundtrip_all_fields() {
        let task = sample();
        let line = encode_task(&task);
        assert_eq!(decode_task(&line), Some(task));
    }

    #[test]
    fn test_reencode_is_byte_identical() {
        let line = encode_task(&sample());
        let again = encode_task(&decode_task(&line).unwrap());
        assert_eq!(line, again);
    }

    #[test]
    fn test_line_reads_as_checklist() {
        let line = encode_task(&sample());
        assert!(line.starts_with("- [x] Buy milk | eggs <!-- "));
        assert!(line.ends_with(" -->"));
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let line = "- [ ] Call mom <!-- id: 7 | uuid: 5f0c2a4e-8d1b-4c3e-9f6a-1b2c3d4e5f60 | updated: 99 -->";
        let task = decode_task(line).unwrap();
        assert_eq!(task.title, "Call mom");
        assert_eq!(task.repeat, RepeatInterval::None);
        assert!(!task.fired);
        assert_eq!(task.reminder, None);
        assert_eq!(task.created, 0);
        assert_eq!(task.updated, 99);
    }

    #[test]
    fn test_non_positive_reminder_is_unset() {
        let line = "- [ ] x <!-- uuid: 5f0c2a4e-8d1b-4c3e-9f6a-1b2c3d4e5f60 | reminder: 0 | next_reminder: -5 -->";
        let task = decode_task(line).unwrap();
        assert_eq!(task.reminder, None);
        assert_eq!(task.next_reminder, None);
    }

    #[test]
    fn test_bare_checkbox_gets_title_derived_uuid() {
        let a = decode_task("- [ ] Water plants").unwrap();
        let b = decode_task("- [x] Water plants").unwrap();
        assert_eq!(a.uuid, b.uuid);
        assert!(b.completed);
    }

    #[test]
    fn test_bare_lines_with_same_title_stay_distinct() {
        let text = "- [ ] Call mom\n- [x] Call mom\n";
        let tasks = decode_task_list(text);
        assert_eq!(tasks.len(), 2);
        assert_ne!(tasks[0].uuid, tasks[1].uuid);
        assert_eq!(tasks[0].uuid, decode_task("- [ ] Call mom").unwrap().uuid);

        // Both sides of a merge derive the same identities.
        let again = decode_task_list(text);
        assert_eq!(tasks[0].uuid, again[0].uuid);
        assert_eq!(tasks[1].uuid, again[1].uuid);
        assert!(again[1].completed);
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        assert!(decode_task("# Groceries").is_none());
        assert!(decode_task("").is_none());
        assert!(decode_task("- [?] odd").is_none());
        assert!(decode_task("- [ ] bad <!-- uuid: not-a-uuid -->").is_none());
    }

    #[test]
    fn test_decode_list_skips_corrupt_lines() {
        let mut text = encode_task_list(&[sample()]);
        text.push_str("<<<<<<< garbage\n");
        text.push_str("- [ ] Second\n");
        let tasks = decode_task_list(&text);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].title, "Second");
    }

    #[test]
    fn test_title_with_comment_text_survives() {
        let mut task = sample();
        task.title = "see <!-- this --> later".to_string();
        let decoded = decode_task(&encode_task(&task)).unwrap();
        assert_eq!(decoded.title, task.title);
    }
}
