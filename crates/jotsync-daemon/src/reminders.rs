//! Reminder scheduler for a headless host: nothing can pop up, so
//! reminders are only logged.

use chrono::{DateTime, Utc};
use jotsync_core::{ReminderScheduler, Task};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Keeps the set of pending reminders and logs changes to it.
#[derive(Default)]
pub struct LoggingScheduler {
    pending: Mutex<HashMap<Uuid, i64>>,
}

impl LoggingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reminder times currently held, by task UUID.
    pub fn pending(&self) -> HashMap<Uuid, i64> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn due_time(task: &Task) -> Option<i64> {
    task.next_reminder.or(task.reminder)
}

fn format_time(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}

impl ReminderScheduler for LoggingScheduler {
    fn schedule(&self, task: &Task) {
        let Some(due) = due_time(task) else {
            return;
        };
        info!("Reminder for \"{}\" at {}", task.title, format_time(due));
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task.uuid, due);
    }

    fn cancel(&self, task: &Task) {
        if self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&task.uuid)
            .is_some()
        {
            info!("Reminder for \"{}\" cancelled", task.title);
        }
    }

    fn reschedule_all(&self, tasks: &[Task]) {
        let pending: HashMap<Uuid, i64> = tasks
            .iter()
            .filter_map(|t| due_time(t).map(|due| (t.uuid, due)))
            .collect();
        debug!("{} reminders pending", pending.len());
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = pending;
    }
}
