//! jotsync-daemon library: exposes the daemon components for testing.

pub mod config;
pub mod reminders;
pub mod watcher;

pub use config::{Args, Config, ConfigError};
pub use reminders::LoggingScheduler;
pub use watcher::{FileEvent, FileEventKind, FileWatcher, record_kind};
