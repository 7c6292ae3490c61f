//! SyncOrchestrator: one end-to-end synchronization pass at a time.
//!
//! A pass runs save-local, push, pull, resolve, reload in that order. Local
//! edits are on disk before any network call, so a failed pass never loses
//! them. A rejected push gets exactly one pull-resolve-reload retry.
//!
//! Two gates keep passes apart: the `Idle`/`Syncing` status refuses a
//! second pass outright, and the work lock makes single-record pushes and
//! deletions wait for a running pass instead of touching the working tree
//! mid-merge.

use crate::config::SyncSettings;
use crate::events::{SyncListener, SyncStatus};
use crate::fs::{FileSystem, FsError};
use crate::model::{Note, RecordKind, RepeatInterval, Task, TaskEntry, TaskList, now_millis};
use crate::resolver::{self, ConflictKind};
use crate::store::{MemoryStore, RecordStore, StoreError};
use crate::transport::{PullOutcome, PushOutcome, RepoTransport, TransportError};
use crate::workspace::{
    IMAGES_DIR, LISTS_DIR, METADATA_PATH, NOTES_DIR, Workspace, ensure_single_selection,
    group_by_list,
};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Local reminder scheduling, owned by the host.
pub trait ReminderScheduler: Send + Sync {
    fn schedule(&self, task: &Task);
    fn cancel(&self, task: &Task);
    /// Replace every scheduled reminder with these tasks' reminders.
    fn reschedule_all(&self, tasks: &[Task]);
}

/// Scheduler for hosts without reminders.
pub struct NoopScheduler;

impl ReminderScheduler for NoopScheduler {
    fn schedule(&self, _task: &Task) {}
    fn cancel(&self, _task: &Task) {}
    fn reschedule_all(&self, _tasks: &[Task]) {}
}

/// Per-process UI state the orchestrator must respect.
#[derive(Debug, Default)]
pub struct Session {
    selected_list: RwLock<Option<Uuid>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected_list(&self) -> Option<Uuid> {
        *self.selected_list.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_selected_list(&self, list: Option<Uuid>) {
        *self.selected_list.write().unwrap_or_else(|e| e.into_inner()) = list;
    }
}

/// Everything the orchestrator collaborates with, wired up by the
/// composition root.
pub struct SyncContext {
    pub lists: Arc<dyn RecordStore<TaskList>>,
    pub tasks: Arc<dyn RecordStore<TaskEntry>>,
    pub notes: Arc<dyn RecordStore<Note>>,
    pub listener: Arc<dyn SyncListener>,
    pub scheduler: Arc<dyn ReminderScheduler>,
    pub session: Arc<Session>,
    pub settings: SyncSettings,
}

impl SyncContext {
    /// Context backed by fresh in-memory stores.
    pub fn in_memory(
        listener: Arc<dyn SyncListener>,
        scheduler: Arc<dyn ReminderScheduler>,
    ) -> Self {
        Self {
            lists: Arc::new(MemoryStore::new()),
            tasks: Arc::new(MemoryStore::new()),
            notes: Arc::new(MemoryStore::new()),
            listener,
            scheduler,
            session: Arc::new(Session::new()),
            settings: SyncSettings::default(),
        }
    }
}

/// A record to delete everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRef {
    Task(Uuid),
    Note(Uuid),
}

struct SyncState {
    status: SyncStatus,
    last_success: Option<Instant>,
}

/// Paths a full pass stages.
fn sync_paths() -> Vec<String> {
    vec![
        LISTS_DIR.to_string(),
        NOTES_DIR.to_string(),
        IMAGES_DIR.to_string(),
    ]
}

/// Paths a single-record push stages.
fn paths_for(kind: RecordKind) -> Vec<String> {
    match kind {
        RecordKind::Task => vec![LISTS_DIR.to_string()],
        RecordKind::Note => vec![NOTES_DIR.to_string()],
        RecordKind::ListMetadata => vec![METADATA_PATH.to_string()],
    }
}

/// Tasks that should hold a scheduled reminder.
///
/// A repeating task whose reminder already fired is handed over with its
/// next occurrence after `now`; a one-shot reminder that fired is dropped.
pub fn pending_reminders(entries: &[TaskEntry], now: i64) -> Vec<Task> {
    entries
        .iter()
        .map(|e| &e.task)
        .filter(|t| t.has_pending_reminder())
        .filter_map(|t| {
            if !t.fired {
                return Some(t.clone());
            }
            if t.repeat == RepeatInterval::None {
                return None;
            }
            let anchor = t.original_reminder.or(t.reminder)?;
            Some(Task {
                next_reminder: t.repeat.next_after(anchor, now),
                fired: false,
                ..t.clone()
            })
        })
        .collect()
}

pub struct SyncOrchestrator<F: FileSystem> {
    workspace: Workspace<F>,
    transport: Arc<dyn RepoTransport>,
    ctx: SyncContext,
    state: Mutex<SyncState>,
    work: tokio::sync::Mutex<()>,
}

impl<F: FileSystem> SyncOrchestrator<F> {
    pub fn new(fs: F, transport: Arc<dyn RepoTransport>, ctx: SyncContext) -> Self {
        Self {
            workspace: Workspace::new(fs),
            transport,
            ctx,
            state: Mutex::new(SyncState {
                status: SyncStatus::Idle,
                last_success: None,
            }),
            work: tokio::sync::Mutex::new(()),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn workspace(&self) -> &Workspace<F> {
        &self.workspace
    }

    pub fn status(&self) -> SyncStatus {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).status
    }

    /// Claim the `Syncing` state, or refuse.
    fn try_begin(&self, manual: bool) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.status == SyncStatus::Syncing {
            debug!("Sync already running");
            return false;
        }
        if !manual
            && let Some(last) = state.last_success
            && last.elapsed() < self.ctx.settings.cooldown
        {
            debug!("Sync skipped, last pass {:?} ago", last.elapsed());
            return false;
        }
        state.status = SyncStatus::Syncing;
        true
    }

    /// Rest at `Idle` and report the outcome. A failure is announced as
    /// `Error` to the listener, but never leaves the machine there.
    fn finish(&self, result: &Result<String>) {
        let status = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.status = SyncStatus::Idle;
            match result {
                Ok(_) => {
                    state.last_success = Some(Instant::now());
                    SyncStatus::Idle
                }
                Err(_) => SyncStatus::Error,
            }
        };

        let listener = &self.ctx.listener;
        listener.on_sync_status_changed(status);
        match result {
            Ok(message) => {
                info!("{}", message);
                listener.on_sync_success(message);
            }
            Err(e) => {
                error!("Sync failed: {}", e);
                listener.on_sync_error(&e.to_string());
            }
        }
    }

    fn progress(&self, message: &str) {
        debug!("{}", message);
        self.ctx.listener.on_sync_progress(message);
    }

    /// Run one pass to completion.
    ///
    /// Returns `None` when the pass was refused (already running or inside
    /// the cooldown window without `manual`).
    pub async fn sync(&self, manual: bool) -> Option<Result<()>> {
        if !self.try_begin(manual) {
            return None;
        }
        Some(self.run_claimed().await)
    }

    async fn run_claimed(&self) -> Result<()> {
        self.ctx.listener.on_sync_status_changed(SyncStatus::Syncing);
        self.ctx.listener.on_sync_started();

        let result = {
            let _work = self.work.lock().await;
            self.run_pass().await
        };
        self.finish(&result);
        result.map(|_| ())
    }

    async fn run_pass(&self) -> Result<String> {
        if !self.transport.is_initialized().await {
            self.progress("Cloning repository");
            self.transport.clone_repo().await?;
            self.reload().await?;
            return Ok("Repository cloned".to_string());
        }

        self.progress("Saving local changes");
        self.save_local().await?;

        self.progress("Pushing local changes");
        self.push_with_retry().await?;

        self.progress("Pulling remote changes");
        self.pull_and_resolve().await?;

        self.progress("Reloading records");
        self.reload().await?;
        Ok("Sync complete".to_string())
    }

    async fn push_with_retry(&self) -> Result<()> {
        let mut retries = 0;
        loop {
            match self
                .transport
                .commit_and_push("Sync local changes", &sync_paths())
                .await
            {
                Ok(outcome) => {
                    debug!("Push: {:?}", outcome);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && retries < self.ctx.settings.max_push_retries => {
                    retries += 1;
                    warn!("Push failed ({}), pulling before retry {}", e, retries);
                    self.progress("Push rejected, merging remote changes");
                    self.pull_and_resolve().await?;
                    self.reload().await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn pull_and_resolve(&self) -> Result<()> {
        match self.transport.pull().await {
            PullOutcome::UpToDateOrMerged => {}
            PullOutcome::Conflicting(paths) => {
                self.progress("Resolving conflicts");
                self.resolve_conflicts(&paths).await?;
                match self
                    .transport
                    .commit_and_push("Resolve sync conflicts", &sync_paths())
                    .await
                {
                    Ok(_) => {}
                    Err(e) => {
                        // The next pass completes the merge and pushes it.
                        warn!("Could not publish conflict resolution: {}", e);
                        return Ok(());
                    }
                }
            }
            PullOutcome::Failed(e) => return Err(e.into()),
        }
        self.restore_missing_files().await
    }

    async fn resolve_conflicts(&self, paths: &[String]) -> Result<()> {
        let fs = self.workspace.fs();
        for path in paths {
            let text = match fs.read_to_string(path).await {
                Ok(text) => text,
                Err(FsError::NotFound(_)) => {
                    debug!("Conflicted path {} was deleted", path);
                    continue;
                }
                Err(FsError::NotUtf8(_)) => {
                    debug!("Conflicted path {} is binary, keeping ours", path);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let content = match ConflictKind::from_path(path) {
                Some(kind) => {
                    let resolution = resolver::resolve(&text, kind);
                    if let Some(reason) = resolution.fallback {
                        warn!("Kept local side of {}: {}", path, reason);
                    }
                    resolution.content
                }
                None => resolver::keep_local(&text),
            };
            fs.write(path, content.as_bytes()).await?;
            info!("Resolved conflict in {}", path);
        }
        Ok(())
    }

    /// Post-pull audit: every file in HEAD must exist in the working tree.
    async fn restore_missing_files(&self) -> Result<()> {
        let tracked = self.transport.tracked_paths().await?;
        let missing = self.workspace.audit_tracked(&tracked).await?;
        if !missing.is_empty() {
            warn!(
                "{} tracked files missing from working tree, restoring from HEAD",
                missing.len()
            );
            self.transport.force_checkout_head().await?;
        }
        Ok(())
    }

    async fn save_local(&self) -> Result<()> {
        let lists = self.ctx.lists.get_all();
        if lists.is_empty() {
            // Stores were never loaded; writing now would wipe the lists.
            debug!("Stores empty, nothing to save");
            return Ok(());
        }
        let tasks = group_by_list(&self.ctx.tasks.get_all());
        self.workspace
            .save_all(&lists, &tasks, &self.ctx.notes.get_all())
            .await?;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let (snapshot, issues) = self
            .workspace
            .load_snapshot_preferring(self.ctx.session.selected_list())
            .await?;

        for path in &snapshot.stale_note_files {
            match self.workspace.fs().delete(path).await {
                Ok(()) | Err(FsError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !issues.is_empty() {
            self.workspace.save_list_metadata(&snapshot.lists).await?;
        }

        self.ctx
            .session
            .set_selected_list(snapshot.selected_list().map(|l| l.id));

        let entries = snapshot.task_entries();
        self.ctx
            .scheduler
            .reschedule_all(&pending_reminders(&entries, now_millis()));

        debug!(
            "Loaded {} lists, {} tasks, {} notes",
            snapshot.lists.len(),
            entries.len(),
            snapshot.notes.len()
        );
        self.ctx.lists.replace_all(snapshot.lists);
        self.ctx.tasks.replace_all(entries);
        self.ctx.notes.replace_all(snapshot.notes);
        Ok(())
    }

    /// Replace the stores with what is on disk.
    pub async fn load_from_disk(&self) -> Result<()> {
        let _work = self.work.lock().await;
        self.reload().await
    }

    /// Persist one kind of record and push just its paths.
    ///
    /// Waits for a running pass to finish first.
    pub async fn push_now(&self, label: &str, kind: RecordKind) -> Result<PushOutcome> {
        let _work = self.work.lock().await;
        match kind {
            RecordKind::Note => {
                self.workspace.save_notes(&self.ctx.notes.get_all()).await?;
            }
            RecordKind::Task | RecordKind::ListMetadata => {
                let lists = self.ctx.lists.get_all();
                if !lists.is_empty() {
                    let tasks = group_by_list(&self.ctx.tasks.get_all());
                    self.workspace.save_task_lists(&lists, &tasks).await?;
                }
            }
        }
        let outcome = self.transport.commit_and_push(label, &paths_for(kind)).await?;
        debug!("push_now({}): {:?}", label, outcome);
        Ok(outcome)
    }

    /// Delete a record locally and on the remote.
    ///
    /// The store is only updated once the remote deletion went through, so
    /// `false` means the caller should keep showing the record.
    pub async fn delete_remote_record(&self, record: RecordRef) -> bool {
        let _work = self.work.lock().await;
        match self.delete_record(record).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Deleting {:?} failed: {}", record, e);
                false
            }
        }
    }

    async fn delete_record(&self, record: RecordRef) -> Result<()> {
        match record {
            RecordRef::Note(uuid) => {
                let note = self.ctx.notes.get(uuid).ok_or(StoreError::NotFound(uuid))?;
                for path in self.workspace.note_files(&note).await? {
                    let message = format!("Delete note {}", path);
                    self.transport.remove_file(&path, &message).await?;
                }
                self.ctx.notes.delete(uuid)?;
                Ok(())
            }
            RecordRef::Task(uuid) => {
                let entry = self
                    .ctx
                    .tasks
                    .get(uuid)
                    .ok_or(StoreError::NotFound(uuid))?;
                let remaining: Vec<TaskEntry> = self
                    .ctx
                    .tasks
                    .get_all()
                    .into_iter()
                    .filter(|e| e.task.uuid != uuid)
                    .collect();
                self.workspace
                    .save_task_lists(&self.ctx.lists.get_all(), &group_by_list(&remaining))
                    .await?;

                let message = format!("Delete task {}", entry.task.title);
                self.transport
                    .commit_and_push(&message, &paths_for(RecordKind::Task))
                    .await?;

                self.ctx.tasks.delete(uuid)?;
                self.ctx.scheduler.cancel(&entry.task);
                Ok(())
            }
        }
    }

    /// Make `list` the single selected list and persist the metadata.
    pub async fn select_list(&self, list: Uuid) -> Result<()> {
        let _work = self.work.lock().await;
        let mut lists = self.ctx.lists.get_all();
        if !lists.iter().any(|l| l.id == list) {
            return Err(StoreError::NotFound(list).into());
        }
        ensure_single_selection(&mut lists, Some(list));
        for updated in &lists {
            self.ctx.lists.update(updated.clone())?;
        }
        self.ctx.session.set_selected_list(Some(list));
        self.workspace.save_list_metadata(&lists).await?;
        Ok(())
    }
}

impl<F: FileSystem + 'static> SyncOrchestrator<F> {
    /// Start a pass in the background. Returns whether one was started.
    pub fn start_sync(self: &Arc<Self>, manual: bool) -> bool {
        if !self.try_begin(manual) {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _ = this.run_claimed().await;
        });
        true
    }
}
