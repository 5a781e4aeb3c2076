//! WatcherTask - debounced file watcher feeding the sync engine.
//!
//! # Design
//!
//! notify's sync callback forwards raw events over a channel with
//! `blocking_send`; the async task consumes them, coalesces rapid changes
//! per path, and emits a [`ChangeEvent`] once a path has been quiet for the
//! debounce window. Gitignore rules plus the eligibility path filter drop
//! uninteresting paths before they enter the pending map.
//!
//! The task runs until the cancellation token fires or the notify watcher
//! is dropped; remaining pending changes are flushed on shutdown.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tether_core::SyncConfig;

use crate::eligibility;

/// A settled file change, ready for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
  /// Created or modified: (re)index this file
  Upsert(PathBuf),
  /// Deleted: drop the local dedup marker
  Removed(PathBuf),
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
  /// Root directory to watch
  pub root: PathBuf,
  pub sync: SyncConfig,
}

impl WatcherConfig {
  pub fn debounce(&self) -> Duration {
    self.sync.watcher_debounce()
  }
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("failed to watch path: {0}")]
  Watch(#[source] notify::Error),

  #[error("failed to build gitignore: {0}")]
  Gitignore(#[source] ignore::Error),
}

/// The kind of pending change being debounced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
  Created,
  Modified,
  Deleted,
}

/// A change waiting out the debounce window
#[derive(Debug)]
struct PendingChange {
  kind: ChangeKind,
  last_event: Instant,
}

impl PendingChange {
  fn new(kind: ChangeKind) -> Self {
    Self {
      kind,
      last_event: Instant::now(),
    }
  }

  /// Fold a new event into the pending one, coalescing where it matters.
  fn update(&mut self, kind: ChangeKind) {
    self.last_event = Instant::now();

    match (self.kind, kind) {
      // Create followed by modify is still a create
      (ChangeKind::Created, ChangeKind::Modified) => {
        trace!("Coalescing create+modify -> create");
      }
      // Delete followed by create is a modify
      (ChangeKind::Deleted, ChangeKind::Created) => {
        self.kind = ChangeKind::Modified;
        trace!("Coalescing delete+create -> modified");
      }
      // Create followed by delete: emit the delete to clean up
      (ChangeKind::Created, ChangeKind::Deleted) => {
        self.kind = ChangeKind::Deleted;
        trace!("Coalescing create+delete -> delete");
      }
      _ => {
        self.kind = kind;
      }
    }
  }
}

/// Map a notify event kind onto our change vocabulary.
///
/// Rename halves map to delete/create so the coalescing rules handle a
/// same-path rename pair naturally. Access and metadata-only events are
/// dropped.
fn classify_event(kind: &EventKind) -> Option<ChangeKind> {
  use notify::event::{ModifyKind, RenameMode};

  match kind {
    EventKind::Create(_) => Some(ChangeKind::Created),
    EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
    EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
    EventKind::Modify(ModifyKind::Metadata(_)) => None,
    EventKind::Modify(_) => Some(ChangeKind::Modified),
    EventKind::Remove(_) => Some(ChangeKind::Deleted),
    EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
  }
}

/// Debounced file watcher emitting [`ChangeEvent`]s on a channel.
pub struct WatcherTask {
  config: WatcherConfig,
  events_tx: mpsc::Sender<ChangeEvent>,
  cancel: CancellationToken,
  // The notify watcher must be held to keep it alive
  _watcher: RecommendedWatcher,
  // Channel receiving raw events from notify's sync callback
  notify_rx: mpsc::Receiver<Result<Event, notify::Error>>,
  gitignore: Option<Gitignore>,
}

impl WatcherTask {
  pub fn new(
    config: WatcherConfig,
    events_tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
  ) -> Result<Self, WatcherError> {
    info!(root = %config.root.display(), "Initializing file watcher");

    let gitignore = build_gitignore(&config.root)?;

    let (notify_tx, notify_rx) = mpsc::channel::<Result<Event, notify::Error>>(256);

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        // Runs on notify's thread; drop the event if the channel is full
        let _ = notify_tx.blocking_send(res);
      },
      Config::default(),
    )
    .map_err(WatcherError::Init)?;

    watcher
      .watch(&config.root, RecursiveMode::Recursive)
      .map_err(WatcherError::Watch)?;

    info!(root = %config.root.display(), "File watcher initialized");

    Ok(Self {
      config,
      events_tx,
      cancel,
      _watcher: watcher,
      notify_rx,
      gitignore,
    })
  }

  /// Spawn the watcher on the runtime and return its join handle.
  pub fn spawn(
    config: WatcherConfig,
    events_tx: mpsc::Sender<ChangeEvent>,
    cancel: CancellationToken,
  ) -> Result<tokio::task::JoinHandle<()>, WatcherError> {
    let task = Self::new(config, events_tx, cancel)?;
    Ok(tokio::spawn(task.run()))
  }

  /// Run until cancelled or the notify channel closes.
  pub async fn run(mut self) {
    info!(root = %self.config.root.display(), "WatcherTask started");

    let mut pending: HashMap<PathBuf, PendingChange> = HashMap::new();
    let mut debounce_interval = tokio::time::interval(self.config.debounce());

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          info!("WatcherTask shutting down (cancelled)");
          break;
        }

        event = self.notify_rx.recv() => {
          match event {
            Some(Ok(event)) => {
              self.process_event(&mut pending, event);
            }
            Some(Err(e)) => {
              warn!(err = %e, "Watcher error");
            }
            None => {
              info!("WatcherTask shutting down (channel closed)");
              break;
            }
          }
        }

        _ = debounce_interval.tick() => {
          self.flush_settled(&mut pending).await;
        }
      }
    }

    if !pending.is_empty() {
      debug!(pending = pending.len(), "Flushing remaining pending changes on shutdown");
      self.flush_all(&mut pending).await;
    }

    info!(root = %self.config.root.display(), "WatcherTask stopped");
  }

  fn is_ignored(&self, path: &Path) -> bool {
    if let Some(ref gitignore) = self.gitignore {
      gitignore.matched_path_or_any_parents(path, path.is_dir()).is_ignore()
    } else {
      false
    }
  }

  /// Fold one raw notify event into the pending map.
  fn process_event(&self, pending: &mut HashMap<PathBuf, PendingChange>, event: Event) {
    let Some(kind) = classify_event(&event.kind) else {
      trace!(kind = ?event.kind, "Ignoring event kind");
      return;
    };

    for path in event.paths {
      if path.is_dir() {
        trace!(path = %path.display(), "Skipping directory event");
        continue;
      }

      if self.is_ignored(&path) {
        trace!(path = %path.display(), "Skipping ignored file");
        continue;
      }

      // Deletes must pass through so stale dedup markers get dropped,
      // but there is no point tracking files we would never index
      if kind != ChangeKind::Deleted && eligibility::check_path(&path).is_err() {
        trace!(path = %path.display(), "Skipping ineligible file");
        continue;
      }

      debug!(path = %path.display(), kind = ?kind, "File event");
      if let Some(existing) = pending.get_mut(&path) {
        existing.update(kind);
      } else {
        pending.insert(path, PendingChange::new(kind));
      }
    }
  }

  /// Emit changes whose debounce window has passed.
  async fn flush_settled(&self, pending: &mut HashMap<PathBuf, PendingChange>) {
    let now = Instant::now();
    let debounce = self.config.debounce();

    let settled: Vec<PathBuf> = pending
      .iter()
      .filter(|(_, change)| now.duration_since(change.last_event) >= debounce)
      .map(|(path, _)| path.clone())
      .collect();

    if settled.is_empty() {
      return;
    }

    debug!(count = settled.len(), "Flushing settled changes");

    for path in settled {
      if let Some(change) = pending.remove(&path) {
        self.send_change(path, change.kind).await;
      }
    }
  }

  async fn flush_all(&self, pending: &mut HashMap<PathBuf, PendingChange>) {
    let changes: Vec<(PathBuf, PendingChange)> = pending.drain().collect();

    for (path, change) in changes {
      self.send_change(path, change.kind).await;
    }
  }

  async fn send_change(&self, path: PathBuf, kind: ChangeKind) {
    let event = match kind {
      ChangeKind::Created | ChangeKind::Modified => ChangeEvent::Upsert(path),
      ChangeKind::Deleted => ChangeEvent::Removed(path),
    };

    if self.events_tx.send(event).await.is_err() {
      warn!("Change event receiver dropped");
    }
  }
}

/// Build a gitignore matcher for the watched root.
fn build_gitignore(root: &Path) -> Result<Option<Gitignore>, WatcherError> {
  let gitignore_path = root.join(".gitignore");

  if !gitignore_path.exists() {
    debug!(root = %root.display(), "No .gitignore found");
    return Ok(None);
  }

  let mut builder = GitignoreBuilder::new(root);
  if let Some(err) = builder.add(&gitignore_path) {
    warn!(err = %err, "Error parsing .gitignore, continuing with partial rules");
  }

  let gitignore = builder.build().map_err(WatcherError::Gitignore)?;
  debug!(root = %root.display(), "Gitignore matcher built");
  Ok(Some(gitignore))
}
