//! jotsync-daemon: keeps a task and note repository in sync with its remote.
//!
//! Runs a sync pass on a timer and pushes local edits picked up by the
//! file watcher.

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use jotsync_core::{
    EventBus, GitTransport, NativeFs, RecordKind, RepoTransport, SyncContext, SyncEvent,
    SyncOrchestrator, SyncStatus,
};
use jotsync_daemon::config::{Args, Config};
use jotsync_daemon::reminders::LoggingScheduler;
use jotsync_daemon::watcher::{FileEvent, FileWatcher};

const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

type Orchestrator = SyncOrchestrator<NativeFs>;

fn log_event(event: SyncEvent) {
    match &event {
        SyncEvent::Started { .. } => debug!("Sync started"),
        SyncEvent::Progress { message, .. } => debug!("Sync: {}", message),
        SyncEvent::Success { message, .. } => info!("Sync finished: {}", message),
        SyncEvent::Error { message, .. } => warn!("Sync failed: {}", message),
        SyncEvent::StatusChanged { .. } => {
            if let Ok(json) = serde_json::to_string(&event) {
                debug!("{}", json);
            }
        }
    }
}

/// Push the record kinds touched by a batch of file events.
async fn push_local_edits(orchestrator: &Orchestrator, kinds: BTreeSet<RecordKind>) {
    if orchestrator.status() == SyncStatus::Syncing {
        // The running pass stages everything itself.
        debug!("Sync in progress, skipping {} local edit(s)", kinds.len());
        return;
    }
    if let Err(e) = orchestrator.load_from_disk().await {
        error!("Failed to load records after local edit: {}", e);
        return;
    }
    for kind in kinds {
        let label = match kind {
            RecordKind::Note => "Update notes",
            RecordKind::Task => "Update tasks",
            RecordKind::ListMetadata => "Update lists",
        };
        match orchestrator.push_now(label, kind).await {
            Ok(outcome) => debug!("{}: {:?}", label, outcome),
            Err(e) => warn!("{} failed: {}", label, e),
        }
    }
}

/// Collect the first event and anything else already queued.
fn drain_kinds(first: FileEvent, watcher: &mut FileWatcher) -> BTreeSet<RecordKind> {
    let mut kinds = BTreeSet::from([first.record]);
    while let Ok(event) = watcher.event_rx().try_recv() {
        kinds.insert(event.record);
    }
    kinds
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,jotsync_core=debug,jotsync_daemon=debug"
    } else {
        "info,jotsync_core=info,jotsync_daemon=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_env_and_args(args)?;
    info!("Starting jotsync-daemon");
    info!("Repository path: {:?}", config.repo_path);
    info!("Remote: {} ({})", config.remote.url, config.remote.branch);

    let transport = Arc::new(GitTransport::initialize(&config.repo_path, &config.remote)?);
    let events = Arc::new(EventBus::new());
    let _subscription = events.subscribe(log_event);
    let ctx = SyncContext::in_memory(events.clone(), Arc::new(LoggingScheduler::new()));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        NativeFs::new(&config.repo_path),
        transport.clone(),
        ctx,
    ));

    if transport.is_initialized().await {
        orchestrator
            .load_from_disk()
            .await
            .context("Failed to load records")?;
    }

    match orchestrator.sync(true).await {
        Some(Ok(())) => {}
        Some(Err(e)) if config.once => return Err(e.into()),
        Some(Err(e)) => error!("Initial sync failed: {}", e),
        None => {}
    }
    if config.once {
        return Ok(());
    }

    std::fs::create_dir_all(&config.repo_path)?;
    let mut watcher = FileWatcher::new(config.repo_path.clone(), WATCH_DEBOUNCE)?;
    info!("File watcher started on {:?}", watcher.repo_path());

    let mut ticker = tokio::time::interval(config.interval);
    // The first tick completes immediately; the initial pass already ran.
    ticker.tick().await;

    info!("Daemon running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !orchestrator.start_sync(false) {
                    debug!("Periodic sync skipped");
                }
            }

            Some(event) = watcher.event_rx().recv() => {
                let kinds = drain_kinds(event, &mut watcher);
                push_local_edits(&orchestrator, kinds).await;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
