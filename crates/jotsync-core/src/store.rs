//! Record stores: the local state the orchestrator loads into and saves
//! from.
//!
//! The host application may bring its own store; `MemoryStore` is the
//! in-process implementation used by the daemon and the tests.

use crate::model::Record;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Rejected user input, e.g. an empty title.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    #[error("Record already exists: {0}")]
    AlreadyExists(Uuid),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Change notifications from a store.
pub trait StoreListener<R>: Send + Sync {
    fn on_added(&self, _record: &R) {}
    fn on_updated(&self, _record: &R) {}
    fn on_deleted(&self, _uuid: Uuid) {}
    fn on_replaced(&self, _records: &[R]) {}
    fn on_error(&self, _error: &StoreError) {}
}

/// Keyed collection of records.
pub trait RecordStore<R: Record>: Send + Sync {
    /// Every record, in insertion order.
    fn get_all(&self) -> Vec<R>;

    fn get(&self, uuid: Uuid) -> Option<R> {
        self.get_all().into_iter().find(|r| r.uuid() == uuid)
    }

    fn add(&self, record: R) -> Result<()>;

    fn update(&self, record: R) -> Result<()>;

    fn delete(&self, uuid: Uuid) -> Result<R>;

    /// Swap the whole contents, e.g. after a reload from disk.
    fn replace_all(&self, records: Vec<R>);
}

/// Store held in memory behind a lock.
pub struct MemoryStore<R> {
    records: RwLock<Vec<R>>,
    listeners: RwLock<Vec<Arc<dyn StoreListener<R>>>>,
}

impl<R: Record> Default for MemoryStore<R> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }
}

impl<R: Record> MemoryStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn StoreListener<R>>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, f: impl Fn(&dyn StoreListener<R>)) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(Arc::clone)
            .collect();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    fn fail<T>(&self, error: StoreError) -> Result<T> {
        self.notify(|l| l.on_error(&error));
        Err(error)
    }

    fn validate(&self, record: &R) -> Result<()> {
        if record.title().trim().is_empty() {
            return self.fail(StoreError::InvalidInput("title must not be empty".to_string()));
        }
        Ok(())
    }
}

impl<R: Record> RecordStore<R> for MemoryStore<R> {
    fn get_all(&self) -> Vec<R> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn add(&self, record: R) -> Result<()> {
        self.validate(&record)?;
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            if records.iter().any(|r| r.uuid() == record.uuid()) {
                drop(records);
                return self.fail(StoreError::AlreadyExists(record.uuid()));
            }
            records.push(record.clone());
        }
        debug!("Added record {}", record.uuid());
        self.notify(|l| l.on_added(&record));
        Ok(())
    }

    fn update(&self, record: R) -> Result<()> {
        self.validate(&record)?;
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            match records.iter_mut().find(|r| r.uuid() == record.uuid()) {
                Some(slot) => *slot = record.clone(),
                None => {
                    drop(records);
                    return self.fail(StoreError::NotFound(record.uuid()));
                }
            }
        }
        self.notify(|l| l.on_updated(&record));
        Ok(())
    }

    fn delete(&self, uuid: Uuid) -> Result<R> {
        let removed = {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            records
                .iter()
                .position(|r| r.uuid() == uuid)
                .map(|index| records.remove(index))
        };
        match removed {
            Some(record) => {
                self.notify(|l| l.on_deleted(uuid));
                Ok(record)
            }
            None => self.fail(StoreError::NotFound(uuid)),
        }
    }

    fn replace_all(&self, records: Vec<R>) {
        *self.records.write().unwrap_or_else(|e| e.into_inner()) = records.clone();
        self.notify(|l| l.on_replaced(&records));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Note, Task, TaskEntry};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl StoreListener<Note> for Recorder {
        fn on_added(&self, record: &Note) {
            self.events.lock().unwrap().push(format!("added {}", record.title));
        }
        fn on_updated(&self, record: &Note) {
            self.events.lock().unwrap().push(format!("updated {}", record.title));
        }
        fn on_deleted(&self, _uuid: Uuid) {
            self.events.lock().unwrap().push("deleted".to_string());
        }
        fn on_replaced(&self, records: &[Note]) {
            self.events.lock().unwrap().push(format!("replaced {}", records.len()));
        }
        fn on_error(&self, error: &StoreError) {
            self.events.lock().unwrap().push(format!("error {}", error));
        }
    }

    #[test]
    fn test_crud_notifies_listeners() {
        let store = MemoryStore::<Note>::new();
        let recorder = Arc::new(Recorder::default());
        store.add_listener(recorder.clone());

        let note = Note::new("Ideas", "");
        store.add(note.clone()).unwrap();
        store
            .update(Note {
                title: "Better ideas".into(),
                ..note.clone()
            })
            .unwrap();
        assert_eq!(store.get(note.uuid).unwrap().title, "Better ideas");

        store.delete(note.uuid).unwrap();
        store.replace_all(vec![Note::new("a", ""), Note::new("b", "")]);
        assert_eq!(store.len(), 2);

        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["added Ideas", "updated Better ideas", "deleted", "replaced 2"]
        );
    }

    #[test]
    fn test_empty_title_is_rejected() {
        let store = MemoryStore::<Note>::new();
        let recorder = Arc::new(Recorder::default());
        store.add_listener(recorder.clone());

        let err = store.add(Note::new("   ", "body")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert!(store.is_empty());
        assert_eq!(recorder.events.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_and_duplicate_records() {
        let store = MemoryStore::<TaskEntry>::new();
        let entry = TaskEntry {
            list_id: Uuid::new_v4(),
            task: Task::new("a"),
        };
        store.add(entry.clone()).unwrap();
        assert_eq!(
            store.add(entry.clone()),
            Err(StoreError::AlreadyExists(entry.task.uuid))
        );
        assert_eq!(
            store.delete(Uuid::nil()),
            Err(StoreError::NotFound(Uuid::nil()))
        );
        assert!(store.update(TaskEntry {
            list_id: entry.list_id,
            task: Task::new("b"),
        })
        .is_err());
    }
}
