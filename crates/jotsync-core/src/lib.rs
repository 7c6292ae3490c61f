//! jotsync-core: git-backed synchronization for tasks and notes.
//!
//! This crate provides:
//! - Record model and plain-text codecs for tasks, notes and list metadata
//! - Record-level resolution of files left with merge conflict markers
//! - The `RepoTransport` abstraction and its libgit2 implementation
//! - The sync orchestrator driving save, push, pull, resolve and reload
//! - FileSystem trait abstraction over the repository working tree

pub mod codec;
pub mod config;
pub mod events;
pub mod fs;
pub mod git;
pub mod model;
pub mod native_fs;
pub mod orchestrator;
pub mod resolver;
pub mod store;
pub mod transport;
pub mod workspace;

pub use config::{CredentialSupplier, RemoteConfig, SyncSettings};
pub use events::{EventBus, NoopListener, Subscription, SyncEvent, SyncListener, SyncStatus};
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use git::GitTransport;
pub use model::{Note, Record, RecordKind, RepeatInterval, Task, TaskEntry, TaskList};
pub use native_fs::NativeFs;
pub use orchestrator::{
    NoopScheduler, RecordRef, ReminderScheduler, Session, SyncContext, SyncError,
    SyncOrchestrator,
};
pub use resolver::{ConflictError, ConflictKind};
pub use store::{MemoryStore, RecordStore, StoreError, StoreListener};
pub use transport::{PullOutcome, PushOutcome, RepoTransport, TransportError, TransportErrorKind};
pub use workspace::{ConsistencyError, Snapshot, Workspace};
