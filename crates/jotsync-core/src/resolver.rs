//! Conflict resolution for files left with merge markers.
//!
//! A conflicted file is split into its full local and remote versions
//! (context lines go to both, `ours` hunks to local, `theirs` hunks to
//! remote, diff3 base sections are dropped). Both versions are decoded and
//! merged record by record:
//!
//! - task lists: union by UUID, newer `updated` wins, ties keep local
//! - notes: the newer of the two, ties keep local
//! - list metadata: repaired to one array per side, union by id, local wins
//!
//! Whenever the markers can't be understood the local side is kept. The
//! output never contains conflict markers.

use crate::codec::{
    decode_note, decode_task_list, encode_list_metadata, encode_note, encode_task_list,
    normalize_metadata,
};
use crate::model::{Note, Task, TaskList};
use crate::workspace::{LISTS_DIR, METADATA_PATH, NOTES_DIR};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("No conflict markers found")]
    NoMarkers,

    #[error("Conflict marker out of place at line {0}")]
    UnexpectedMarker(usize),

    #[error("Conflict hunk opened at line {0} is never closed")]
    Unterminated(usize),

    #[error("Neither side of the conflict could be decoded")]
    Undecodable,
}

pub type Result<T> = std::result::Result<T, ConflictError>;

/// What the conflicted file holds; picks the merge strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    TaskList,
    Note,
    ListMetadata,
}

impl ConflictKind {
    /// Classify a repository-relative path. `None` for files the resolver
    /// knows nothing about (e.g. attachments).
    pub fn from_path(path: &str) -> Option<Self> {
        let path = path.trim_start_matches('/');
        if path == METADATA_PATH {
            return Some(ConflictKind::ListMetadata);
        }
        if !path.ends_with(".md") {
            return None;
        }
        let under = |dir: &str| path.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/'));
        if under(LISTS_DIR) {
            Some(ConflictKind::TaskList)
        } else if under(NOTES_DIR) {
            Some(ConflictKind::Note)
        } else {
            None
        }
    }
}

/// The two competing versions of a conflicted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSides {
    pub local: String,
    pub remote: String,
}

/// Outcome of resolving one file.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub content: String,
    /// Set when the record merge was skipped and the local side kept.
    pub fallback: Option<ConflictError>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Context,
    Ours,
    Base,
    Theirs,
}

enum Marker {
    Start,
    Base,
    Separator,
    End,
}

fn classify(line: &str) -> Option<Marker> {
    let line = line.trim_end_matches(['\r', '\n']);
    let is_marker = |prefix: &str| {
        line.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
    };
    if is_marker("<<<<<<<") {
        Some(Marker::Start)
    } else if is_marker("|||||||") {
        Some(Marker::Base)
    } else if line == "=======" {
        Some(Marker::Separator)
    } else if is_marker(">>>>>>>") {
        Some(Marker::End)
    } else {
        None
    }
}

/// Rebuild the full local and remote versions of a conflicted file.
///
/// Line endings are kept, so content outside and inside hunks comes
/// through byte for byte. Separator lines outside a hunk are ordinary
/// content (a setext heading underline looks exactly like one).
pub fn split_conflict(text: &str) -> Result<ConflictSides> {
    let mut sides = ConflictSides {
        local: String::new(),
        remote: String::new(),
    };
    let mut section = Section::Context;
    let mut opened_at = 0;
    let mut hunks = 0;

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        match (section, classify(line)) {
            (Section::Context, Some(Marker::Start)) => {
                section = Section::Ours;
                opened_at = line_no;
                hunks += 1;
            }
            (Section::Context, Some(Marker::Separator)) | (Section::Context, None) => {
                sides.local.push_str(line);
                sides.remote.push_str(line);
            }
            (Section::Ours, Some(Marker::Base)) => section = Section::Base,
            (Section::Ours | Section::Base, Some(Marker::Separator)) => section = Section::Theirs,
            (Section::Ours, None) => sides.local.push_str(line),
            (Section::Base, None) => {}
            (Section::Theirs, Some(Marker::End)) => section = Section::Context,
            (Section::Theirs, None) => sides.remote.push_str(line),
            _ => return Err(ConflictError::UnexpectedMarker(line_no)),
        }
    }

    if section != Section::Context {
        return Err(ConflictError::Unterminated(opened_at));
    }
    if hunks == 0 {
        return Err(ConflictError::NoMarkers);
    }
    Ok(sides)
}

/// Best-effort local version of a file whose markers don't parse.
///
/// Keeps context and `ours` lines, drops base and `theirs` lines and every
/// marker line.
pub fn keep_local(text: &str) -> String {
    let mut out = String::new();
    let mut section = Section::Context;

    for line in text.split_inclusive('\n') {
        match classify(line) {
            Some(Marker::Start) => section = Section::Ours,
            Some(Marker::Base) if section == Section::Ours => section = Section::Base,
            Some(Marker::Separator) if section != Section::Context => section = Section::Theirs,
            Some(Marker::End) => section = Section::Context,
            Some(Marker::Base) => {}
            _ => {
                if matches!(section, Section::Context | Section::Ours) {
                    out.push_str(line);
                }
            }
        }
    }
    out
}

/// Resolve one conflicted file into marker-free content.
pub fn resolve(text: &str, kind: ConflictKind) -> Resolution {
    let sides = match split_conflict(text) {
        Ok(sides) => sides,
        Err(ConflictError::NoMarkers) if kind == ConflictKind::ListMetadata => {
            // Concatenated arrays without markers still need repair.
            return resolve_list_metadata(text, "");
        }
        Err(ConflictError::NoMarkers) => {
            return Resolution {
                content: text.to_string(),
                fallback: None,
            };
        }
        Err(e) => {
            warn!("Unreadable conflict markers ({}), keeping local version", e);
            return Resolution {
                content: keep_local(text),
                fallback: Some(e),
            };
        }
    };

    match kind {
        ConflictKind::TaskList => {
            let merged = merge_tasks(decode_task_list(&sides.local), decode_task_list(&sides.remote));
            Resolution {
                content: encode_task_list(&merged),
                fallback: None,
            }
        }
        ConflictKind::Note => match merge_notes(decode_note(&sides.local), decode_note(&sides.remote)) {
            Some(note) => Resolution {
                content: encode_note(&note),
                fallback: None,
            },
            None => {
                warn!("Neither side of a note conflict decodes, keeping local version");
                Resolution {
                    content: sides.local,
                    fallback: Some(ConflictError::Undecodable),
                }
            }
        },
        ConflictKind::ListMetadata => resolve_list_metadata(&sides.local, &sides.remote),
    }
}

fn resolve_list_metadata(local: &str, remote: &str) -> Resolution {
    let local_lists = normalize_metadata(local);
    let remote_lists = normalize_metadata(remote);

    if local_lists.is_err() && remote_lists.is_err() && !local.trim().is_empty() {
        warn!("Neither side of the list metadata decodes, keeping local version");
        return Resolution {
            content: local.to_string(),
            fallback: Some(ConflictError::Undecodable),
        };
    }

    let merged = merge_list_metadata(
        local_lists.unwrap_or_default(),
        remote_lists.unwrap_or_default(),
    );
    Resolution {
        content: encode_list_metadata(&merged),
        fallback: None,
    }
}

/// Union two task sets by UUID.
///
/// Where both sides hold a task the later `updated` wins; ties keep the
/// local copy. Output follows local order, then remote-only tasks in
/// remote order. A task present on one side only is always kept, since
/// absence can't be told apart from "not seen yet".
pub fn merge_tasks(local: Vec<Task>, remote: Vec<Task>) -> Vec<Task> {
    let mut order: Vec<Uuid> = Vec::new();
    let mut winners: HashMap<Uuid, Task> = HashMap::new();

    for task in local.into_iter().chain(remote) {
        match winners.get(&task.uuid) {
            None => {
                order.push(task.uuid);
                winners.insert(task.uuid, task);
            }
            Some(current) if task.updated > current.updated => {
                debug!("Task {} taken from newer copy", task.uuid);
                winners.insert(task.uuid, task);
            }
            Some(_) => {}
        }
    }

    order
        .into_iter()
        .filter_map(|uuid| winners.remove(&uuid))
        .collect()
}

/// Pick one note out of the two sides. Ties keep local.
pub fn merge_notes(local: Option<Note>, remote: Option<Note>) -> Option<Note> {
    match (local, remote) {
        (Some(local), Some(remote)) => {
            if remote.updated > local.updated {
                Some(remote)
            } else {
                Some(local)
            }
        }
        (local, remote) => local.or(remote),
    }
}

/// Union list metadata by id; the local copy wins on collision.
pub fn merge_list_metadata(local: Vec<TaskList>, remote: Vec<TaskList>) -> Vec<TaskList> {
    let mut merged = local;
    for list in remote {
        if !merged.iter().any(|l| l.id == list.id) {
            merged.push(list);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_list_metadata, encode_task};
    use crate::model::RepeatInterval;

    fn task(uuid: Uuid, title: &str, updated: i64) -> Task {
        Task {
            id: 1,
            uuid,
            title: title.to_string(),
            completed: false,
            created: 1,
            updated,
            reminder: None,
            repeat: RepeatInterval::None,
            original_reminder: None,
            next_reminder: None,
            fired: false,
        }
    }

    fn conflicted(local: &str, remote: &str) -> String {
        format!("<<<<<<< ours\n{local}=======\n{remote}>>>>>>> theirs\n")
    }

    fn assert_marker_free(text: &str) {
        for line in text.lines() {
            assert!(classify(line).is_none(), "marker left in output: {line}");
        }
    }

    #[test]
    fn test_split_with_context_and_diff3_base() {
        let text = "head\n<<<<<<< HEAD\nmine\n||||||| base\nold\n=======\ntheirs\n>>>>>>> origin/main\ntail\n";
        let sides = split_conflict(text).unwrap();
        assert_eq!(sides.local, "head\nmine\ntail\n");
        assert_eq!(sides.remote, "head\ntheirs\ntail\n");
    }

    #[test]
    fn test_split_errors() {
        assert_eq!(split_conflict("plain\n"), Err(ConflictError::NoMarkers));
        assert_eq!(
            split_conflict("<<<<<<< ours\na\n"),
            Err(ConflictError::Unterminated(1))
        );
        assert_eq!(
            split_conflict("<<<<<<< ours\n>>>>>>> theirs\n"),
            Err(ConflictError::UnexpectedMarker(2))
        );
    }

    #[test]
    fn test_separator_outside_hunk_is_content() {
        let text = "Title\n=======\n<<<<<<< ours\na\n=======\nb\n>>>>>>> theirs\n";
        let sides = split_conflict(text).unwrap();
        assert_eq!(sides.local, "Title\n=======\na\n");
    }

    #[test]
    fn test_scenario_remote_completion_wins() {
        let u1 = Uuid::new_v4();
        let local = task(u1, "Buy milk", 100);
        let mut remote = task(u1, "Buy milk", 200);
        remote.completed = true;

        let text = conflicted(
            &format!("{}\n", encode_task(&local)),
            &format!("{}\n", encode_task(&remote)),
        );
        let resolution = resolve(&text, ConflictKind::TaskList);
        assert!(resolution.fallback.is_none());
        assert_marker_free(&resolution.content);

        let tasks = decode_task_list(&resolution.content);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].uuid, u1);
        assert!(tasks[0].completed);
    }

    #[test]
    fn test_merge_recency_and_tie() {
        let u = Uuid::new_v4();
        let merged = merge_tasks(vec![task(u, "old", 1)], vec![task(u, "new", 2)]);
        assert_eq!(merged[0].title, "new");

        let merged = merge_tasks(vec![task(u, "new", 2)], vec![task(u, "old", 1)]);
        assert_eq!(merged[0].title, "new");

        let merged = merge_tasks(vec![task(u, "local", 5)], vec![task(u, "remote", 5)]);
        assert_eq!(merged[0].title, "local");
    }

    #[test]
    fn test_merge_disjoint_sets_commutes() {
        let a = vec![task(Uuid::new_v4(), "a1", 1), task(Uuid::new_v4(), "a2", 2)];
        let b = vec![task(Uuid::new_v4(), "b1", 3)];

        let mut ab: Vec<Uuid> = merge_tasks(a.clone(), b.clone()).iter().map(|t| t.uuid).collect();
        let mut ba: Vec<Uuid> = merge_tasks(b, a).iter().map(|t| t.uuid).collect();
        ab.sort();
        ba.sort();
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 3);
    }

    #[test]
    fn test_merge_keeps_local_order_then_remote_only() {
        let (x, y, z) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let merged = merge_tasks(
            vec![task(x, "x", 1), task(y, "y", 1)],
            vec![task(z, "z", 1), task(x, "x2", 9)],
        );
        let titles: Vec<_> = merged.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["x2", "y", "z"]);
    }

    #[test]
    fn test_note_conflict_newer_wins_and_one_sided() {
        let mut local = Note::new("Plan", "local body\n");
        local.updated = 10;
        let mut remote = local.clone();
        remote.content = "remote body\n".to_string();
        remote.updated = 20;

        let text = conflicted(&encode_note(&local), &encode_note(&remote));
        let resolution = resolve(&text, ConflictKind::Note);
        assert_marker_free(&resolution.content);
        assert_eq!(decode_note(&resolution.content).unwrap().content, "remote body\n");

        assert_eq!(merge_notes(None, Some(remote.clone())), Some(remote));
        assert_eq!(merge_notes(Some(local.clone()), None), Some(local));
    }

    #[test]
    fn test_note_conflict_in_body_hunk() {
        let mut note = Note::new("Plan", "same\n");
        note.updated = 10;
        let encoded = encode_note(&note);
        // Conflict confined to the body; headers are shared context.
        let text = encoded.replace(
            "same\n",
            "<<<<<<< ours\nmine\n=======\ntheirs\n>>>>>>> theirs\n",
        );
        let resolution = resolve(&text, ConflictKind::Note);
        let resolved = decode_note(&resolution.content).unwrap();
        assert_eq!(resolved.uuid, note.uuid);
        assert_eq!(resolved.content, "mine\n");
    }

    #[test]
    fn test_metadata_scenario_empty_local() {
        let l1 = TaskList::new("L1", "l1.md");
        let text = conflicted("[]\n", &encode_list_metadata(&[l1.clone()]));
        let resolution = resolve(&text, ConflictKind::ListMetadata);
        assert_marker_free(&resolution.content);
        assert_eq!(decode_list_metadata(&resolution.content).unwrap(), vec![l1]);
    }

    #[test]
    fn test_metadata_local_wins_on_collision() {
        let l1 = TaskList::new("Mine", "l1.md");
        let mut theirs = l1.clone();
        theirs.name = "Theirs".to_string();
        let l2 = TaskList::new("Other", "l2.md");

        let merged = merge_list_metadata(vec![l1.clone()], vec![theirs, l2.clone()]);
        assert_eq!(merged, vec![l1, l2]);
    }

    #[test]
    fn test_metadata_concatenation_without_markers_is_repaired() {
        let a = TaskList::new("A", "a.md");
        let b = TaskList::new("B", "b.md");
        let text = format!(
            "{}{}",
            encode_list_metadata(&[a.clone()]),
            encode_list_metadata(&[b.clone()])
        );
        let resolution = resolve(&text, ConflictKind::ListMetadata);
        assert_eq!(decode_list_metadata(&resolution.content).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_broken_markers_fall_back_to_local() {
        let text = "keep\n<<<<<<< ours\nmine\n=======\ntheirs\n";
        let resolution = resolve(text, ConflictKind::TaskList);
        assert_eq!(resolution.fallback, Some(ConflictError::Unterminated(2)));
        assert_eq!(resolution.content, "keep\nmine\n");

        let copy = resolution.clone();
        assert_eq!(copy.fallback, resolution.fallback);
    }

    #[test]
    fn test_kind_from_path() {
        assert_eq!(
            ConflictKind::from_path("todo_lists/metadata.json"),
            Some(ConflictKind::ListMetadata)
        );
        assert_eq!(
            ConflictKind::from_path("todo_lists/groceries.md"),
            Some(ConflictKind::TaskList)
        );
        assert_eq!(ConflictKind::from_path("notes/Plan.md"), Some(ConflictKind::Note));
        assert_eq!(ConflictKind::from_path("images/a.png"), None);
    }
}
