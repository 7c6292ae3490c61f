//! File watcher with debouncing for record files in the repository.
//!
//! Uses notify-debouncer-mini for efficient file change detection.

use anyhow::Result;
use jotsync_core::RecordKind;
use jotsync_core::workspace::{LISTS_DIR, METADATA_PATH, NOTES_DIR};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebouncedEvent, new_debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// File event from the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path relative to the repository root, `/`-separated
    pub path: String,
    /// Record kind stored at that path
    pub record: RecordKind,
    pub kind: FileEventKind,
}

/// Type of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// File was created or modified
    Modified,
    /// File was deleted
    Deleted,
}

/// Which record kind a repository-relative path holds, if any.
pub fn record_kind(relative: &str) -> Option<RecordKind> {
    if relative == METADATA_PATH {
        return Some(RecordKind::ListMetadata);
    }
    if !relative.ends_with(".md") {
        return None;
    }
    let (dir, name) = relative.rsplit_once('/')?;
    if name.starts_with('.') {
        return None;
    }
    match dir {
        LISTS_DIR => Some(RecordKind::Task),
        NOTES_DIR => Some(RecordKind::Note),
        _ => None,
    }
}

/// Watches the record directories of a repository.
pub struct FileWatcher {
    repo_path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

/// Last seen mtime per path, to drop events that changed nothing.
type MtimeCache = Arc<Mutex<HashMap<String, SystemTime>>>;

impl FileWatcher {
    /// Start watching `repo_path`, debouncing for `debounce`.
    pub fn new(repo_path: PathBuf, debounce: Duration) -> Result<Self> {
        // FSEvents needs the real path (/var -> /private/var on macOS).
        let repo_path = repo_path.canonicalize().unwrap_or(repo_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = repo_path.clone();
        let mtime_cache: MtimeCache = Arc::new(Mutex::new(HashMap::new()));

        let mut debouncer = new_debouncer(
            debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        if let Some(file_event) = Self::process_event(&event, &root, &mtime_cache)
                            && event_tx.send(file_event).is_err()
                        {
                            // Receiver dropped
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&repo_path, RecursiveMode::Recursive)?;

        Ok(Self {
            repo_path,
            _debouncer: debouncer,
            event_rx,
        })
    }

    fn process_event(
        event: &DebouncedEvent,
        repo_path: &Path,
        mtime_cache: &MtimeCache,
    ) -> Option<FileEvent> {
        let path = &event.path;
        let relative = path.strip_prefix(repo_path).ok()?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        let record = record_kind(&relative)?;

        let kind = if path.exists() {
            FileEventKind::Modified
        } else {
            FileEventKind::Deleted
        };

        let mut cache = mtime_cache.lock().unwrap_or_else(|e| e.into_inner());
        match kind {
            FileEventKind::Modified => {
                if let Ok(mtime) = std::fs::metadata(path).and_then(|m| m.modified()) {
                    if cache.get(&relative) == Some(&mtime) {
                        return None;
                    }
                    cache.insert(relative.clone(), mtime);
                }
            }
            FileEventKind::Deleted => {
                cache.remove(&relative);
            }
        }

        debug!("File event: {:?} - {}", kind, relative);
        Some(FileEvent {
            path: relative,
            record,
            kind,
        })
    }

    /// Get the receiver for file events.
    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_by_path() {
        assert_eq!(record_kind("todo_lists/metadata.json"), Some(RecordKind::ListMetadata));
        assert_eq!(record_kind("todo_lists/tasks.md"), Some(RecordKind::Task));
        assert_eq!(record_kind("notes/Groceries.md"), Some(RecordKind::Note));
        assert_eq!(record_kind("notes/.hidden.md"), None);
        assert_eq!(record_kind("notes/sub/deep.md"), None);
        assert_eq!(record_kind("images/cat.png"), None);
        assert_eq!(record_kind(".git/HEAD"), None);
        assert_eq!(record_kind("README.md"), None);
    }
}
