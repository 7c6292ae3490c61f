//! Record types: tasks, notes and task lists.
//!
//! Every record carries a UUID, the only identity that is safe to join on
//! across devices. Timestamps are milliseconds since the Unix epoch.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Namespace for name-based UUIDs (legacy task lines, the default list).
pub const JOTSYNC_NAMESPACE: Uuid = Uuid::from_u128(0x6a6f_7473_796e_4000_8000_0000_0000_0001);

static NEXT_TASK_ID: AtomicI64 = AtomicI64::new(1);

/// Allocate a process-unique task id.
///
/// Ids are only unique within this process. Two devices may hand out the
/// same id for different tasks, so never use it to match records across
/// devices.
pub fn next_task_id() -> i64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Make sure ids handed out later don't collide with ids read from disk.
pub fn observe_task_id(id: i64) {
    NEXT_TASK_ID.fetch_max(id.saturating_add(1), Ordering::Relaxed);
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Anything the stores and the resolver can key by UUID.
pub trait Record: Clone + Send + Sync + 'static {
    fn uuid(&self) -> Uuid;

    /// Title used for validation and file naming.
    fn title(&self) -> &str;
}

/// How often a task's reminder repeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatInterval {
    #[default]
    None,
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
}

impl RepeatInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepeatInterval::None => "none",
            RepeatInterval::Weekly => "weekly",
            RepeatInterval::Biweekly => "biweekly",
            RepeatInterval::Monthly => "monthly",
            RepeatInterval::Quarterly => "quarterly",
        }
    }

    /// First occurrence strictly after `now`, stepping from `anchor`.
    ///
    /// Monthly steps are calendar months counted from the anchor, so an
    /// anchor on the 31st lands on the last day of shorter months.
    /// Returns `None` for non-repeating tasks.
    pub fn next_after(&self, anchor: i64, now: i64) -> Option<i64> {
        const DAY_MS: i64 = 24 * 60 * 60 * 1000;

        let step_days = match self {
            RepeatInterval::None => return None,
            RepeatInterval::Weekly => Some(7),
            RepeatInterval::Biweekly => Some(14),
            RepeatInterval::Monthly | RepeatInterval::Quarterly => None,
        };

        if let Some(days) = step_days {
            let step = days * DAY_MS;
            if anchor > now {
                return Some(anchor);
            }
            let periods = (now - anchor) / step + 1;
            return Some(anchor + periods * step);
        }

        let months_per_step = if *self == RepeatInterval::Monthly { 1 } else { 3 };
        let start = DateTime::<Utc>::from_timestamp_millis(anchor)?;
        let mut n: u32 = 0;
        loop {
            let candidate = start.checked_add_months(Months::new(n * months_per_step))?;
            let millis = candidate.timestamp_millis();
            if millis > now {
                return Some(millis);
            }
            n += 1;
        }
    }
}

impl Display for RepeatInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepeatInterval {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(RepeatInterval::None),
            "weekly" => Ok(RepeatInterval::Weekly),
            "biweekly" => Ok(RepeatInterval::Biweekly),
            "monthly" => Ok(RepeatInterval::Monthly),
            "quarterly" => Ok(RepeatInterval::Quarterly),
            _ => Err(()),
        }
    }
}

/// A single to-do item inside a task list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: i64,
    pub uuid: Uuid,
    pub title: String,
    pub completed: bool,
    pub created: i64,
    pub updated: i64,
    /// Reminder time; `None` when unset.
    pub reminder: Option<i64>,
    pub repeat: RepeatInterval,
    /// Anchor that repeat calculations step from.
    pub original_reminder: Option<i64>,
    pub next_reminder: Option<i64>,
    pub fired: bool,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: next_task_id(),
            uuid: Uuid::new_v4(),
            title: title.into(),
            completed: false,
            created: now,
            updated: now,
            reminder: None,
            repeat: RepeatInterval::None,
            original_reminder: None,
            next_reminder: None,
            fired: false,
        }
    }

    /// Copy with the completion flag flipped.
    pub fn toggled(&self) -> Self {
        Self {
            completed: !self.completed,
            updated: now_millis(),
            ..self.clone()
        }
    }

    /// Copy with a new title.
    pub fn with_title(&self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            updated: now_millis(),
            ..self.clone()
        }
    }

    /// Whether the scheduler should hold a reminder for this task.
    pub fn has_pending_reminder(&self) -> bool {
        !self.completed && (self.reminder.is_some() || self.next_reminder.is_some())
    }
}

impl Record for Task {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// A task together with the list it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEntry {
    pub list_id: Uuid,
    pub task: Task,
}

impl Record for TaskEntry {
    fn uuid(&self) -> Uuid {
        self.task.uuid
    }

    fn title(&self) -> &str {
        &self.task.title
    }
}

/// A free-form markdown note. One file per note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Kept for files written by older versions; carries no meaning.
    pub id: i64,
    pub uuid: Uuid,
    pub title: String,
    pub content: String,
    pub created: i64,
    pub updated: i64,
    /// Decoded from a file without the UUID marker line.
    pub legacy: bool,
}

impl Note {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            created: now,
            updated: now,
            legacy: false,
        }
    }
}

impl Record for Note {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// Metadata for one task list. Persisted as an element of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    pub id: Uuid,
    pub name: String,
    /// Backing file under `todo_lists/`.
    #[serde(rename = "file")]
    pub file_name: String,
    #[serde(rename = "total", default)]
    pub total_count: usize,
    #[serde(rename = "active", default)]
    pub active_count: usize,
    #[serde(rename = "default", default)]
    pub is_default: bool,
    #[serde(rename = "selected", default)]
    pub is_selected: bool,
}

impl TaskList {
    pub fn new(name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            file_name: file_name.into(),
            total_count: 0,
            active_count: 0,
            is_default: false,
            is_selected: false,
        }
    }

    /// The list every device creates when the repository has none.
    ///
    /// Its UUID is name-based so two fresh devices agree on it.
    pub fn default_list() -> Self {
        Self {
            id: Uuid::new_v5(&JOTSYNC_NAMESPACE, b"default-list"),
            name: "Tasks".to_string(),
            file_name: "tasks.md".to_string(),
            total_count: 0,
            active_count: 0,
            is_default: true,
            is_selected: true,
        }
    }

    pub fn refresh_counts(&mut self, tasks: &[Task]) {
        self.total_count = tasks.len();
        self.active_count = tasks.iter().filter(|t| !t.completed).count();
    }
}

impl Record for TaskList {
    fn uuid(&self) -> Uuid {
        self.id
    }

    fn title(&self) -> &str {
        &self.name
    }
}

/// Kind of record a change touches; picks the paths a narrow push stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordKind {
    Task,
    Note,
    ListMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 24 * 60 * 60 * 1000;

    #[test]
    fn test_task_ids_are_unique() {
        let a = Task::new("a");
        let b = Task::new("b");
        assert_ne!(a.id, b.id);
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn test_observe_task_id_moves_counter_past_loaded_ids() {
        observe_task_id(1_000_000);
        assert!(next_task_id() > 1_000_000);
    }

    #[test]
    fn test_toggled_keeps_identity() {
        let task = Task::new("Buy milk");
        let done = task.toggled();
        assert!(done.completed);
        assert_eq!(done.uuid, task.uuid);
        assert_eq!(done.id, task.id);
        assert!(done.updated >= task.updated);
    }

    #[test]
    fn test_weekly_next_after() {
        let anchor = 1_700_000_000_000;
        assert_eq!(
            RepeatInterval::Weekly.next_after(anchor, anchor),
            Some(anchor + 7 * DAY)
        );
        assert_eq!(
            RepeatInterval::Weekly.next_after(anchor, anchor + 8 * DAY),
            Some(anchor + 14 * DAY)
        );
        assert_eq!(RepeatInterval::Biweekly.next_after(anchor, anchor - 1), Some(anchor));
        assert_eq!(RepeatInterval::None.next_after(anchor, anchor), None);
    }

    #[test]
    fn test_monthly_next_after_uses_calendar_months() {
        // 2024-01-31T00:00:00Z
        let anchor = 1_706_659_200_000;
        let next = RepeatInterval::Monthly.next_after(anchor, anchor).unwrap();
        let date = DateTime::<Utc>::from_timestamp_millis(next).unwrap();
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-02-29");

        let quarter = RepeatInterval::Quarterly.next_after(anchor, anchor).unwrap();
        let date = DateTime::<Utc>::from_timestamp_millis(quarter).unwrap();
        assert_eq!(date.format("%Y-%m-%d").to_string(), "2024-04-30");
    }

    #[test]
    fn test_repeat_parse() {
        assert_eq!("Weekly".parse::<RepeatInterval>(), Ok(RepeatInterval::Weekly));
        assert_eq!("".parse::<RepeatInterval>(), Ok(RepeatInterval::None));
        assert!("daily".parse::<RepeatInterval>().is_err());
    }

    #[test]
    fn test_default_list_is_stable_across_calls() {
        assert_eq!(TaskList::default_list().id, TaskList::default_list().id);
    }
}
