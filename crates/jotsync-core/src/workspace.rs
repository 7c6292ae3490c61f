//! Workspace: records on disk inside the repository working tree.
//!
//! Layout (repository-relative):
//! - `todo_lists/metadata.json` - JSON array of task lists
//! - `todo_lists/<file>.md` - one task per line, one file per list
//! - `notes/<derived-name>.md` - one note per file
//! - `images/` - attachments, never read here
//!
//! Loading never fails on bad content. Whatever is inconsistent gets
//! repaired in the returned snapshot and reported as a `ConsistencyError`.

use crate::codec::{
    decode_list_metadata, decode_note, decode_task_list, derive_filename, derive_list_filename,
    encode_list_metadata, encode_note, encode_task_list, normalize_metadata,
};
use crate::fs::{FileSystem, FsError, Result};
use crate::model::{JOTSYNC_NAMESPACE, Note, Task, TaskEntry, TaskList};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub const LISTS_DIR: &str = "todo_lists";
pub const NOTES_DIR: &str = "notes";
pub const IMAGES_DIR: &str = "images";
pub const METADATA_PATH: &str = "todo_lists/metadata.json";

const RECORD_EXTENSION: &str = ".md";

/// An invariant found broken while loading, and already repaired.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("List metadata held concatenated arrays and was repaired")]
    RepairedMetadata,

    #[error("List metadata is unreadable, lists rebuilt from list files")]
    UnreadableMetadata,

    #[error("List {0} appears more than once in metadata")]
    DuplicateList(Uuid),

    #[error("List file {0} is missing from metadata")]
    OrphanListFile(String),

    #[error("Task {0} appears more than once")]
    DuplicateTask(Uuid),

    #[error("Note {uuid} has a stale copy in {file}")]
    DuplicateNote { uuid: Uuid, file: String },

    #[error("Unreadable record file {0}")]
    UnreadableFile(String),

    #[error("{0} default lists")]
    DefaultCount(usize),

    #[error("{0} selected lists")]
    SelectionCount(usize),
}

/// Every record in the working tree, after repair.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub lists: Vec<TaskList>,
    /// Tasks per list id, in file order.
    pub tasks: HashMap<Uuid, Vec<Task>>,
    pub notes: Vec<Note>,
    /// Note files whose UUID is also stored in a newer file.
    pub stale_note_files: Vec<String>,
}

impl Snapshot {
    /// Tasks flattened with their list membership, in list order.
    pub fn task_entries(&self) -> Vec<TaskEntry> {
        self.lists
            .iter()
            .flat_map(|list| {
                self.tasks
                    .get(&list.id)
                    .into_iter()
                    .flatten()
                    .map(|task| TaskEntry {
                        list_id: list.id,
                        task: task.clone(),
                    })
            })
            .collect()
    }

    pub fn selected_list(&self) -> Option<&TaskList> {
        self.lists.iter().find(|l| l.is_selected)
    }
}

/// Group task entries by list, keeping their relative order.
pub fn group_by_list(entries: &[TaskEntry]) -> HashMap<Uuid, Vec<Task>> {
    let mut grouped: HashMap<Uuid, Vec<Task>> = HashMap::new();
    for entry in entries {
        grouped
            .entry(entry.list_id)
            .or_default()
            .push(entry.task.clone());
    }
    grouped
}

/// A new list with a file name that doesn't clash with `lists`.
pub fn new_task_list(name: &str, lists: &[TaskList]) -> TaskList {
    let id = Uuid::new_v4();
    let existing: HashMap<String, Uuid> = lists
        .iter()
        .map(|l| (l.file_name.clone(), l.id))
        .collect();
    let mut list = TaskList::new(name, derive_list_filename(name, id, &existing));
    list.id = id;
    list
}

/// Exactly one selected list: `preferred` if it exists, else the default,
/// else the first. Returns the number of lists that were selected before.
pub fn ensure_single_selection(lists: &mut [TaskList], preferred: Option<Uuid>) -> usize {
    let selected = lists.iter().filter(|l| l.is_selected).count();
    let target = preferred
        .filter(|id| lists.iter().any(|l| l.id == *id))
        .or_else(|| {
            (selected == 1)
                .then(|| lists.iter().find(|l| l.is_selected).map(|l| l.id))
                .flatten()
        })
        .or_else(|| lists.iter().find(|l| l.is_default).map(|l| l.id))
        .or_else(|| lists.first().map(|l| l.id));
    for list in lists.iter_mut() {
        list.is_selected = Some(list.id) == target;
    }
    selected
}

fn list_path(file_name: &str) -> String {
    format!("{}/{}", LISTS_DIR, file_name)
}

fn note_path(file_name: &str) -> String {
    format!("{}/{}", NOTES_DIR, file_name)
}

struct NoteFile {
    name: String,
    note: Option<Note>,
}

/// Record persistence over a `FileSystem` rooted at the working tree.
pub struct Workspace<F: FileSystem> {
    fs: F,
}

impl<F: FileSystem> Workspace<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Write unless the file already holds exactly `content`.
    async fn write_if_changed(&self, path: &str, content: &str) -> Result<bool> {
        match self.fs.read(path).await {
            Ok(existing) if existing == content.as_bytes() => return Ok(false),
            Ok(_) | Err(FsError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.fs.write(path, content.as_bytes()).await?;
        debug!("Wrote {}", path);
        Ok(true)
    }

    async fn delete_if_exists(&self, path: &str) -> Result<()> {
        match self.fs.delete(path).await {
            Ok(()) | Err(FsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn save_list_metadata(&self, lists: &[TaskList]) -> Result<()> {
        self.write_if_changed(METADATA_PATH, &encode_list_metadata(lists))
            .await?;
        Ok(())
    }

    /// Write one list file, in the given task order.
    pub async fn save_task_list(&self, list: &TaskList, tasks: &[Task]) -> Result<()> {
        self.write_if_changed(&list_path(&list.file_name), &encode_task_list(tasks))
            .await?;
        Ok(())
    }

    /// Write every list file and the metadata, with counts recomputed.
    pub async fn save_task_lists(
        &self,
        lists: &[TaskList],
        tasks: &HashMap<Uuid, Vec<Task>>,
    ) -> Result<Vec<TaskList>> {
        let mut saved = Vec::with_capacity(lists.len());
        for list in lists {
            let list_tasks = tasks.get(&list.id).map(Vec::as_slice).unwrap_or_default();
            self.save_task_list(list, list_tasks).await?;
            let mut list = list.clone();
            list.refresh_counts(list_tasks);
            saved.push(list);
        }
        self.save_list_metadata(&saved).await?;
        Ok(saved)
    }

    async fn scan_notes(&self) -> Result<Vec<NoteFile>> {
        let mut files = Vec::new();
        for name in self.fs.list_files(NOTES_DIR, RECORD_EXTENSION).await? {
            let note = match self.fs.read_to_string(&note_path(&name)).await {
                Ok(text) => decode_note(&text),
                Err(FsError::NotUtf8(_)) => None,
                Err(e) => return Err(e),
            };
            files.push(NoteFile { name, note });
        }
        Ok(files)
    }

    /// Write every note to its derived file name.
    ///
    /// A note whose derived name changed is moved: other files holding the
    /// same UUID are removed. Files for notes missing from `notes` are left
    /// alone.
    pub async fn save_notes(&self, notes: &[Note]) -> Result<()> {
        let mut owners: HashMap<String, Uuid> = HashMap::new();
        for file in self.scan_notes().await? {
            let Some(on_disk) = file.note else {
                continue;
            };
            let owner = notes
                .iter()
                .find(|n| stored_in(n, &on_disk))
                .map_or(on_disk.uuid, |n| n.uuid);
            owners.insert(file.name, owner);
        }

        for note in notes {
            let name = derive_filename(&note.title, note.uuid, &owners);
            let stale: Vec<String> = owners
                .iter()
                .filter(|(file, owner)| **owner == note.uuid && **file != name)
                .map(|(file, _)| file.clone())
                .collect();
            for file in stale {
                debug!("Removing old file {} for note {}", file, note.uuid);
                self.delete_if_exists(&note_path(&file)).await?;
                owners.remove(&file);
            }
            self.write_if_changed(&note_path(&name), &encode_note(note))
                .await?;
            owners.insert(name, note.uuid);
        }
        Ok(())
    }

    /// Persist everything the stores hold.
    pub async fn save_all(
        &self,
        lists: &[TaskList],
        tasks: &HashMap<Uuid, Vec<Task>>,
        notes: &[Note],
    ) -> Result<Vec<TaskList>> {
        let saved = self.save_task_lists(lists, tasks).await?;
        self.save_notes(notes).await?;
        Ok(saved)
    }

    /// Repository-relative paths of every file holding `note`, including
    /// a marker-less file it was loaded from.
    pub async fn note_files(&self, note: &Note) -> Result<Vec<String>> {
        Ok(self
            .scan_notes()
            .await?
            .into_iter()
            .filter(|f| f.note.as_ref().is_some_and(|on_disk| stored_in(note, on_disk)))
            .map(|f| note_path(&f.name))
            .collect())
    }

    pub fn task_list_path(list: &TaskList) -> String {
        list_path(&list.file_name)
    }

    /// Decode the whole working tree, repairing what is inconsistent.
    pub async fn load_snapshot(&self) -> Result<(Snapshot, Vec<ConsistencyError>)> {
        self.load_snapshot_preferring(None).await
    }

    /// Like `load_snapshot`, but keeps `preferred` selected when it still
    /// exists, whatever the metadata on disk selects.
    pub async fn load_snapshot_preferring(
        &self,
        preferred: Option<Uuid>,
    ) -> Result<(Snapshot, Vec<ConsistencyError>)> {
        let mut issues = Vec::new();
        let mut lists = self.load_lists(&mut issues).await?;
        let tasks = self.load_tasks(&lists, &mut issues).await?;
        let (notes, stale_note_files) = self.load_notes(&mut issues).await?;

        heal_defaults(&mut lists, &mut issues);
        let selected = ensure_single_selection(&mut lists, preferred);
        if selected != 1 {
            issues.push(ConsistencyError::SelectionCount(selected));
        }
        for list in &mut lists {
            list.refresh_counts(tasks.get(&list.id).map(Vec::as_slice).unwrap_or_default());
        }

        for issue in &issues {
            warn!("Repaired on load: {}", issue);
        }
        Ok((
            Snapshot {
                lists,
                tasks,
                notes,
                stale_note_files,
            },
            issues,
        ))
    }

    async fn load_lists(&self, issues: &mut Vec<ConsistencyError>) -> Result<Vec<TaskList>> {
        let decoded = match self.fs.read_to_string(METADATA_PATH).await {
            Ok(text) => match decode_list_metadata(&text) {
                Ok(lists) => lists,
                Err(_) => match normalize_metadata(&text) {
                    Ok(lists) => {
                        issues.push(ConsistencyError::RepairedMetadata);
                        lists
                    }
                    Err(_) => {
                        issues.push(ConsistencyError::UnreadableMetadata);
                        Vec::new()
                    }
                },
            },
            Err(FsError::NotFound(_)) => Vec::new(),
            Err(FsError::NotUtf8(_)) => {
                issues.push(ConsistencyError::UnreadableMetadata);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut lists: Vec<TaskList> = Vec::with_capacity(decoded.len());
        for list in decoded {
            if lists.iter().any(|l| l.id == list.id) {
                issues.push(ConsistencyError::DuplicateList(list.id));
            } else {
                lists.push(list);
            }
        }

        for file_name in self.fs.list_files(LISTS_DIR, RECORD_EXTENSION).await? {
            if lists.iter().any(|l| l.file_name == file_name) {
                continue;
            }
            issues.push(ConsistencyError::OrphanListFile(file_name.clone()));
            lists.push(adopt_list_file(&file_name));
        }
        Ok(lists)
    }

    async fn load_tasks(
        &self,
        lists: &[TaskList],
        issues: &mut Vec<ConsistencyError>,
    ) -> Result<HashMap<Uuid, Vec<Task>>> {
        let mut tasks: HashMap<Uuid, Vec<Task>> = HashMap::new();
        // uuid -> (list id, position) of the copy currently kept
        let mut seen: HashMap<Uuid, (Uuid, usize)> = HashMap::new();

        for list in lists {
            let path = list_path(&list.file_name);
            let decoded = match self.fs.read_to_string(&path).await {
                Ok(text) => decode_task_list(&text),
                Err(FsError::NotFound(_)) => Vec::new(),
                Err(FsError::NotUtf8(_)) => {
                    issues.push(ConsistencyError::UnreadableFile(path));
                    Vec::new()
                }
                Err(e) => return Err(e),
            };

            for task in decoded {
                if let Some(&(kept_list, index)) = seen.get(&task.uuid) {
                    issues.push(ConsistencyError::DuplicateTask(task.uuid));
                    if let Some(kept) = tasks.get_mut(&kept_list).and_then(|t| t.get_mut(index))
                        && task.updated > kept.updated
                    {
                        *kept = task;
                    }
                    continue;
                }
                let bucket = tasks.entry(list.id).or_default();
                seen.insert(task.uuid, (list.id, bucket.len()));
                bucket.push(task);
            }
        }
        Ok(tasks)
    }

    async fn load_notes(
        &self,
        issues: &mut Vec<ConsistencyError>,
    ) -> Result<(Vec<Note>, Vec<String>)> {
        let mut notes: Vec<(String, Note)> = Vec::new();
        let mut stale = Vec::new();

        for file in self.scan_notes().await? {
            let Some(note) = file.note else {
                issues.push(ConsistencyError::UnreadableFile(note_path(&file.name)));
                continue;
            };
            match notes.iter_mut().find(|(_, kept)| kept.uuid == note.uuid) {
                Some((kept_name, kept)) => {
                    let loser = if note.updated > kept.updated {
                        *kept = note;
                        std::mem::replace(kept_name, file.name)
                    } else {
                        file.name
                    };
                    issues.push(ConsistencyError::DuplicateNote {
                        uuid: kept.uuid,
                        file: loser.clone(),
                    });
                    stale.push(note_path(&loser));
                }
                None => notes.push((file.name, note)),
            }
        }
        Ok((notes.into_iter().map(|(_, note)| note).collect(), stale))
    }

    /// Tracked paths that are missing from the working tree.
    pub async fn audit_tracked(&self, tracked: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for path in tracked {
            if !self.fs.exists(path).await? {
                missing.push(path.clone());
            }
        }
        Ok(missing)
    }
}

/// A list for a file nobody listed in metadata. The id is derived from the
/// file name so every device adopts it under the same UUID.
/// Whether `on_disk` is a file copy of `note`.
///
/// A legacy file gets a fresh UUID on every decode, so it is matched to the
/// note it was loaded as by title and content.
fn stored_in(note: &Note, on_disk: &Note) -> bool {
    if on_disk.legacy {
        note.legacy && note.title == on_disk.title && note.content == on_disk.content
    } else {
        note.uuid == on_disk.uuid
    }
}

fn adopt_list_file(file_name: &str) -> TaskList {
    let default = TaskList::default_list();
    if file_name == default.file_name {
        return TaskList {
            is_selected: false,
            ..default
        };
    }
    let stem = file_name.strip_suffix(RECORD_EXTENSION).unwrap_or(file_name);
    let mut list = TaskList::new(stem, file_name);
    list.id = Uuid::new_v5(&JOTSYNC_NAMESPACE, format!("list-file:{}", file_name).as_bytes());
    list
}

fn heal_defaults(lists: &mut Vec<TaskList>, issues: &mut Vec<ConsistencyError>) {
    if lists.is_empty() {
        lists.push(TaskList::default_list());
        return;
    }
    let defaults = lists.iter().filter(|l| l.is_default).count();
    if defaults == 1 {
        return;
    }
    issues.push(ConsistencyError::DefaultCount(defaults));
    let keep = lists
        .iter()
        .position(|l| l.is_default)
        .unwrap_or_default();
    for (i, list) in lists.iter_mut().enumerate() {
        list.is_default = i == keep;
    }
}
