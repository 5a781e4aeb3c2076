//! Named watchdog timers for long-running operations.
//!
//! Each armed timer is an id plus a spawned sleep task. Callers report
//! progress through [`TimeoutManager::reset`]; when a timer fires without
//! progress, a [`TimeoutEvent`] is delivered on the manager's event channel
//! so the owner of the operation can abort it. An optional total ceiling
//! bounds how long an operation may run regardless of progress.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex},
  time::{Duration, Instant},
};

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Fired on the manager's event channel when an armed timer elapses
/// without a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutEvent {
  pub id: String,
  pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError {
  #[error("operation '{0}' exceeded its total time ceiling")]
  CeilingExceeded(String),
  #[error("no armed timer for operation '{0}'")]
  Unknown(String),
}

/// Per-timer behavior knobs
#[derive(Debug, Clone, Default)]
pub struct TimeoutOptions {
  /// Hard ceiling on total elapsed time, checked on every reset
  pub max_total: Option<Duration>,
  /// When false, resets are accepted but do not extend the deadline
  pub reset_on_progress: bool,
}

struct TimerEntry {
  started: Instant,
  timeout: Duration,
  options: TimeoutOptions,
  timer: tokio::task::JoinHandle<()>,
}

/// Registry of named watchdog timers.
///
/// `new` returns the receiving half of the event channel; the caller owns it
/// and decides how a fired timeout maps to cancellation.
pub struct TimeoutManager {
  entries: Arc<Mutex<HashMap<String, TimerEntry>>>,
  events: mpsc::Sender<TimeoutEvent>,
}

impl TimeoutManager {
  pub fn new() -> (Self, mpsc::Receiver<TimeoutEvent>) {
    let (tx, rx) = mpsc::channel(16);
    (
      Self {
        entries: Arc::new(Mutex::new(HashMap::new())),
        events: tx,
      },
      rx,
    )
  }

  /// Arm a timer under `id`, replacing any previous timer with that id.
  pub fn arm(&self, id: impl Into<String>, timeout: Duration, options: TimeoutOptions) {
    let id = id.into();
    let mut entries = self.entries.lock().unwrap();

    if let Some(old) = entries.remove(&id) {
      old.timer.abort();
    }

    debug!(id = %id, timeout_ms = timeout.as_millis(), "Arming watchdog timer");
    let timer = self.spawn_timer(id.clone(), timeout);
    entries.insert(
      id,
      TimerEntry {
        started: Instant::now(),
        timeout,
        options,
        timer,
      },
    );
  }

  /// Report progress on an armed operation.
  ///
  /// Checks the total ceiling first: past the ceiling the timer is disarmed
  /// and the call fails, which is the signal to abort the operation. With
  /// `reset_on_progress` the deadline is pushed out by the original timeout;
  /// without it the call is a ceiling check only.
  pub fn reset(&self, id: &str) -> Result<(), TimeoutError> {
    let mut entries = self.entries.lock().unwrap();

    let entry = entries.get(id).ok_or_else(|| TimeoutError::Unknown(id.to_string()))?;

    if let Some(max_total) = entry.options.max_total
      && entry.started.elapsed() >= max_total
    {
      warn!(id = %id, elapsed_ms = entry.started.elapsed().as_millis(), "Operation exceeded its total time ceiling");
      let entry = entries.remove(id).unwrap();
      entry.timer.abort();
      return Err(TimeoutError::CeilingExceeded(id.to_string()));
    }

    if !entry.options.reset_on_progress {
      return Ok(());
    }

    let entry = entries.get_mut(id).unwrap();
    entry.timer.abort();
    entry.timer = self.spawn_timer(id.to_string(), entry.timeout);
    Ok(())
  }

  /// Disarm a timer without firing it. Unknown ids are a no-op.
  pub fn clear(&self, id: &str) {
    let mut entries = self.entries.lock().unwrap();
    if let Some(entry) = entries.remove(id) {
      entry.timer.abort();
      debug!(id = %id, "Cleared watchdog timer");
    }
  }

  pub fn is_armed(&self, id: &str) -> bool {
    self.entries.lock().unwrap().contains_key(id)
  }

  fn spawn_timer(&self, id: String, timeout: Duration) -> tokio::task::JoinHandle<()> {
    let entries = self.entries.clone();
    let events = self.events.clone();
    tokio::spawn(async move {
      tokio::time::sleep(timeout).await;

      // Fired: the entry is removed so a late reset() reports Unknown
      entries.lock().unwrap().remove(&id);
      warn!(id = %id, timeout_ms = timeout.as_millis(), "Watchdog timer fired");
      let _ = events.send(TimeoutEvent { id, timeout }).await;
    })
  }
}

impl Drop for TimeoutManager {
  fn drop(&mut self) {
    let entries = self.entries.lock().unwrap();
    for entry in entries.values() {
      entry.timer.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_timer_fires_without_progress() {
    let (mgr, mut events) = TimeoutManager::new();

    mgr.arm("scan", Duration::from_millis(20), TimeoutOptions::default());
    assert!(mgr.is_armed("scan"));

    let event = tokio::time::timeout(Duration::from_millis(200), events.recv())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(event.id, "scan");
    assert!(!mgr.is_armed("scan"));
  }

  #[tokio::test]
  async fn test_reset_extends_deadline() {
    let (mgr, mut events) = TimeoutManager::new();

    mgr.arm(
      "scan",
      Duration::from_millis(40),
      TimeoutOptions {
        max_total: None,
        reset_on_progress: true,
      },
    );

    // Keep reporting progress past the original deadline
    for _ in 0..4 {
      tokio::time::sleep(Duration::from_millis(20)).await;
      mgr.reset("scan").unwrap();
    }

    assert!(mgr.is_armed("scan"));
    assert!(events.try_recv().is_err());

    mgr.clear("scan");
  }

  #[tokio::test]
  async fn test_reset_without_progress_extension_is_ceiling_check_only() {
    let (mgr, mut events) = TimeoutManager::new();

    mgr.arm(
      "scan",
      Duration::from_millis(30),
      TimeoutOptions {
        max_total: None,
        reset_on_progress: false,
      },
    );

    tokio::time::sleep(Duration::from_millis(15)).await;
    mgr.reset("scan").unwrap();

    // Deadline was not extended: the timer still fires on the original schedule
    let event = tokio::time::timeout(Duration::from_millis(200), events.recv())
      .await
      .unwrap()
      .unwrap();
    assert_eq!(event.id, "scan");
  }

  #[tokio::test]
  async fn test_ceiling_exceeded_disarms_and_errors() {
    let (mgr, mut events) = TimeoutManager::new();

    mgr.arm(
      "scan",
      Duration::from_millis(100),
      TimeoutOptions {
        max_total: Some(Duration::from_millis(20)),
        reset_on_progress: true,
      },
    );

    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = mgr.reset("scan").unwrap_err();
    assert!(matches!(err, TimeoutError::CeilingExceeded(_)));
    assert!(!mgr.is_armed("scan"));

    // Ceiling violation surfaces as the reset error, not a fired event
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_clear_cancels_timer() {
    let (mgr, mut events) = TimeoutManager::new();

    mgr.arm("scan", Duration::from_millis(20), TimeoutOptions::default());
    mgr.clear("scan");
    assert!(!mgr.is_armed("scan"));

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_reset_unknown_id() {
    let (mgr, _events) = TimeoutManager::new();
    let err = mgr.reset("nope").unwrap_err();
    assert!(matches!(err, TimeoutError::Unknown(_)));
  }

  #[tokio::test]
  async fn test_rearming_replaces_previous_timer() {
    let (mgr, mut events) = TimeoutManager::new();

    mgr.arm("scan", Duration::from_millis(15), TimeoutOptions::default());
    mgr.arm("scan", Duration::from_millis(100), TimeoutOptions::default());

    // The first timer was replaced, so nothing fires on its schedule
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(events.try_recv().is_err());
    assert!(mgr.is_armed("scan"));

    mgr.clear("scan");
  }
}
