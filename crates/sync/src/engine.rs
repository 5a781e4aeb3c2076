//! SyncEngine - batched, paced indexing of workspace files.
//!
//! # Design
//!
//! Every file, whether discovered by a full scan or reported by the watcher,
//! goes through the same pipeline: eligibility check, dedup check, one
//! `index_file` tool call. A full scan enumerates candidates with
//! gitignore-aware walking, processes them in fixed-size concurrent batches
//! with a fixed delay in between, and cools down when the backend signals a
//! rate limit. A watchdog timer bounds how long a single batch may stall.
//!
//! Remote failures are accounting events, not scan aborts: the scan finishes
//! with accurate indexed/skipped counts and the failed files wait for their
//! next change event or the next scan.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use tether_core::{
  SyncConfig,
  breaker::{BreakerError, CircuitBreaker},
  cache::{BoundedCache, CacheStats},
  timeout::{TimeoutError, TimeoutManager, TimeoutOptions},
};
use tether_rpc::{ProtocolClient, RpcError, Transport};

use crate::{
  eligibility::{self, Rejection},
  watcher::ChangeEvent,
};

/// Tool invoked on the backend for each (re)indexed file
pub const INDEX_TOOL: &str = "index_file";

const SCAN_WATCHDOG: &str = "scan";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("failed to enumerate workspace: {0}")]
  Walk(#[from] ignore::Error),

  #[error("scan batch stalled for {0:?} without progress")]
  BatchStalled(Duration),

  #[error("scan exceeded its total time ceiling")]
  ScanCeiling,

  #[error("scan cancelled")]
  Cancelled,
}

/// What happened to one file in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
  Indexed,
  Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
  Ineligible(Rejection),
  /// Dedup hit: indexed within the TTL window, no call issued
  RecentlyIndexed,
  Unreadable(String),
  /// Circuit breaker refused the attempt; no network call was made
  CircuitOpen { retry_in: Duration },
}

/// Outcome accounting for one full workspace scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
  /// Candidate files enumerated
  pub seen: usize,
  pub indexed: usize,
  pub ineligible: usize,
  pub cached: usize,
  pub failed: usize,
  pub elapsed: Duration,
}

impl ScanSummary {
  pub fn skipped(&self) -> usize {
    self.ineligible + self.cached + self.failed
  }
}

pub struct SyncEngine<T: Transport> {
  client: Arc<ProtocolClient<T>>,
  config: SyncConfig,
  /// Gates all outbound index calls; shared process-wide
  breaker: Arc<CircuitBreaker>,
  /// "Already indexed" markers keyed by path, short TTL
  dedup: BoundedCache<PathBuf, ()>,
}

impl<T: Transport> SyncEngine<T> {
  pub fn new(client: Arc<ProtocolClient<T>>, config: SyncConfig, breaker: Arc<CircuitBreaker>) -> Self {
    let dedup = BoundedCache::new(config.dedup_max_entries, config.dedup_ttl());
    Self {
      client,
      config,
      breaker,
      dedup,
    }
  }

  pub fn dedup_stats(&self) -> CacheStats {
    self.dedup.stats()
  }

  /// Periodically sweep expired dedup markers until cancelled.
  pub fn spawn_dedup_sweeper(&self, interval: Duration, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    self.dedup.spawn_sweeper(interval, cancel)
  }

  /// Index one file through the eligibility filter and dedup cache.
  ///
  /// Eligibility and read failures are outcomes, not errors; only remote
  /// call failures propagate so the caller can classify them.
  pub async fn sync_file(&self, path: &Path) -> Result<FileOutcome, RpcError> {
    if let Err(rejection) = eligibility::check_path(path) {
      trace!(path = %path.display(), %rejection, "File ineligible by path");
      return Ok(FileOutcome::Skipped(SkipReason::Ineligible(rejection)));
    }

    let content = match tokio::fs::read_to_string(path).await {
      Ok(content) => content,
      Err(e) => {
        debug!(path = %path.display(), err = %e, "Could not read file");
        return Ok(FileOutcome::Skipped(SkipReason::Unreadable(e.to_string())));
      }
    };

    if let Err(rejection) = eligibility::check_content(&content, self.config.max_file_size) {
      trace!(path = %path.display(), %rejection, "File ineligible by content");
      return Ok(FileOutcome::Skipped(SkipReason::Ineligible(rejection)));
    }

    let key = path.to_path_buf();
    if self.dedup.get(&key).is_some() {
      trace!(path = %path.display(), "Recently indexed, skipping");
      return Ok(FileOutcome::Skipped(SkipReason::RecentlyIndexed));
    }

    let payload = serde_json::json!({
      "path": path.to_string_lossy(),
      "content": content,
    });

    match self.breaker.execute(|| self.client.call_tool(INDEX_TOOL, payload)).await {
      Ok(_) => {
        self.dedup.insert(key, ());
        debug!(path = %path.display(), "File indexed");
        Ok(FileOutcome::Indexed)
      }
      Err(BreakerError::Open { retry_in }) => {
        trace!(path = %path.display(), retry_in_ms = retry_in.as_millis(), "Circuit open, skipping");
        Ok(FileOutcome::Skipped(SkipReason::CircuitOpen { retry_in }))
      }
      Err(BreakerError::Inner(e)) => Err(e),
    }
  }

  /// React to one watcher event.
  ///
  /// Deletions only drop the local dedup marker; there is no remote delete
  /// call in the protocol, so the remote index may keep stale entries.
  pub async fn handle_event(&self, event: ChangeEvent) {
    match event {
      ChangeEvent::Upsert(path) => match self.sync_file(&path).await {
        Ok(_) => {}
        Err(e) if e.is_rate_limit() => {
          warn!(
            path = %path.display(),
            cooldown_ms = self.config.rate_limit_cooldown_ms,
            "Rate limited, cooling down"
          );
          tokio::time::sleep(self.config.rate_limit_cooldown()).await;
        }
        Err(e) => {
          warn!(path = %path.display(), err = %e, "Failed to index changed file");
        }
      },
      ChangeEvent::Removed(path) => {
        self.forget(&path);
      }
    }
  }

  /// Drop a file's dedup marker so the next event reindexes it.
  pub fn forget(&self, path: &Path) {
    self.dedup.remove(&path.to_path_buf());
  }

  /// Full workspace scan: enumerate, batch, pace, account.
  pub async fn scan(&self, root: &Path, cancel: &CancellationToken) -> Result<ScanSummary, SyncError> {
    let started = Instant::now();
    let candidates = enumerate(root)?;
    let batch_size = self.config.batch_size.max(1);
    let total_batches = candidates.len().div_ceil(batch_size).max(1);

    info!(
      root = %root.display(),
      candidates = candidates.len(),
      batch_size,
      "Starting workspace scan"
    );

    let mut summary = ScanSummary {
      seen: candidates.len(),
      ..Default::default()
    };

    let (timeouts, mut timeout_events) = TimeoutManager::new();
    timeouts.arm(
      SCAN_WATCHDOG,
      self.config.scan_batch_timeout(),
      TimeoutOptions {
        max_total: self.config.max_scan(),
        reset_on_progress: true,
      },
    );

    for (i, batch) in candidates.chunks(batch_size).enumerate() {
      if i > 0 {
        tokio::time::sleep(self.config.batch_delay()).await;
      }

      let outcomes = tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!(batch = i, total_batches, "Scan cancelled");
          return Err(SyncError::Cancelled);
        }

        Some(event) = timeout_events.recv() => {
          warn!(batch = i, timeout_ms = event.timeout.as_millis(), "Scan batch stalled");
          return Err(SyncError::BatchStalled(event.timeout));
        }

        outcomes = self.process_batch(batch) => outcomes,
      };

      let mut rate_limited = false;
      for (path, outcome) in batch.iter().zip(outcomes) {
        match outcome {
          Ok(FileOutcome::Indexed) => summary.indexed += 1,
          Ok(FileOutcome::Skipped(SkipReason::Ineligible(_))) => summary.ineligible += 1,
          Ok(FileOutcome::Skipped(SkipReason::RecentlyIndexed)) => summary.cached += 1,
          Ok(FileOutcome::Skipped(SkipReason::Unreadable(_))) => summary.failed += 1,
          Ok(FileOutcome::Skipped(SkipReason::CircuitOpen { .. })) => summary.failed += 1,
          Err(e) => {
            summary.failed += 1;
            if e.is_rate_limit() {
              rate_limited = true;
            }
            warn!(path = %path.display(), err = %e, "Index call failed, skipping file");
          }
        }
      }

      if rate_limited {
        warn!(
          cooldown_ms = self.config.rate_limit_cooldown_ms,
          "Backend rate limited, pausing scan"
        );
        tokio::time::sleep(self.config.rate_limit_cooldown()).await;
      }

      debug!(
        batch = i + 1,
        total_batches,
        indexed = summary.indexed,
        skipped = summary.skipped(),
        "Batch complete"
      );

      match timeouts.reset(SCAN_WATCHDOG) {
        Ok(()) => {}
        Err(TimeoutError::CeilingExceeded(_)) => return Err(SyncError::ScanCeiling),
        // The watchdog fired while we were tallying
        Err(TimeoutError::Unknown(_)) => {
          return Err(SyncError::BatchStalled(self.config.scan_batch_timeout()));
        }
      }
    }

    timeouts.clear(SCAN_WATCHDOG);
    summary.elapsed = started.elapsed();

    info!(
      seen = summary.seen,
      indexed = summary.indexed,
      skipped = summary.skipped(),
      failed = summary.failed,
      elapsed_ms = summary.elapsed.as_millis(),
      "Workspace scan complete"
    );
    Ok(summary)
  }

  /// Process one batch's files concurrently, up to the batch width.
  async fn process_batch(&self, batch: &[PathBuf]) -> Vec<Result<FileOutcome, RpcError>> {
    futures::future::join_all(batch.iter().map(|path| self.sync_file(path))).await
  }
}

/// Enumerate candidate files under `root`, honoring gitignore rules.
fn enumerate(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
  let mut files = Vec::new();

  for entry in ignore::WalkBuilder::new(root).build() {
    let entry = entry?;
    if entry.file_type().is_some_and(|t| t.is_file()) {
      files.push(entry.into_path());
    }
  }

  // Stable order makes batching deterministic
  files.sort();
  Ok(files)
}
