//! File watcher behavior against a real directory.

use std::time::Duration;

use jotsync_core::RecordKind;
use jotsync_daemon::{FileEventKind, FileWatcher};
use tempfile::TempDir;
use tokio::time::timeout;

const DEBOUNCE: Duration = Duration::from_millis(100);

fn repo() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(dir.path().join("notes")).unwrap();
    std::fs::create_dir_all(dir.path().join("todo_lists")).unwrap();
    std::fs::create_dir_all(dir.path().join(".git")).unwrap();
    dir
}

#[tokio::test]
async fn test_note_edit_is_reported() {
    let dir = repo();
    let mut watcher = FileWatcher::new(dir.path().to_path_buf(), DEBOUNCE).unwrap();

    // Give watcher time to fully initialize - FSEvents on macOS needs time
    tokio::time::sleep(Duration::from_millis(500)).await;

    let note = dir.path().join("notes/Groceries.md");
    std::fs::write(&note, "eggs").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&note, "eggs\nmilk").unwrap();

    let event = timeout(Duration::from_secs(10), watcher.event_rx().recv())
        .await
        .expect("Timeout waiting for file event")
        .expect("No event received");

    assert_eq!(event.path, "notes/Groceries.md");
    assert_eq!(event.record, RecordKind::Note);
    assert_eq!(event.kind, FileEventKind::Modified);
}

#[tokio::test]
async fn test_git_internals_and_images_are_ignored() {
    let dir = repo();
    let mut watcher = FileWatcher::new(dir.path().to_path_buf(), DEBOUNCE).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    std::fs::write(dir.path().join(".git/index"), "x").unwrap();
    std::fs::create_dir_all(dir.path().join("images")).unwrap();
    std::fs::write(dir.path().join("images/cat.png"), "png").unwrap();

    let result = timeout(Duration::from_secs(2), watcher.event_rx().recv()).await;
    assert!(result.is_err(), "Unexpected event: {:?}", result);

    // A task list write still gets through afterwards.
    std::fs::write(dir.path().join("todo_lists/tasks.md"), "- [ ] Buy milk\n").unwrap();
    let event = timeout(Duration::from_secs(10), watcher.event_rx().recv())
        .await
        .expect("Timeout waiting for file event")
        .expect("No event received");
    assert_eq!(event.path, "todo_lists/tasks.md");
    assert_eq!(event.record, RecordKind::Task);
}
