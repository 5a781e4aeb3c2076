//! Circuit breaker protecting the transport from cascading retries.
//!
//! The breaker is a three-state gate: CLOSED lets calls through and counts
//! consecutive failures, OPEN fails fast until the recovery window elapses,
//! HALF_OPEN admits exactly one trial call that decides whether to close or
//! reopen the circuit.

use std::{
  future::Future,
  sync::Mutex,
  time::{Duration, Instant},
};

use tracing::{debug, info, warn};

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct BreakerConfig {
  /// Consecutive failures before the circuit opens
  pub failure_threshold: u32,
  /// How long the circuit stays open before allowing a trial call
  pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 5,
      recovery_timeout: Duration::from_secs(30),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
  Closed,
  Open,
  HalfOpen,
}

/// Error returned by [`CircuitBreaker::execute`].
///
/// `Open` is distinguishable from a real failure of the wrapped operation so
/// callers can choose not to count it toward their own retry budgets.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E: std::error::Error> {
  #[error("circuit open; next attempt allowed in {retry_in:?}")]
  Open { retry_in: Duration },
  #[error(transparent)]
  Inner(E),
}

impl<E: std::error::Error> BreakerError<E> {
  pub fn is_open(&self) -> bool {
    matches!(self, BreakerError::Open { .. })
  }
}

#[derive(Debug)]
struct BreakerState {
  circuit: CircuitState,
  consecutive_failures: u32,
  last_failure: Option<Instant>,
  next_attempt: Option<Instant>,
  // A HALF_OPEN trial call is in flight; other callers fail fast until it resolves
  probing: bool,
}

/// Three-state failure gate shared by all indexing call sites.
///
/// The state read/mutate sequence around a single `execute` is serialized
/// under a mutex, and the lock is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
  config: BreakerConfig,
  state: Mutex<BreakerState>,
}

impl CircuitBreaker {
  pub fn new(config: BreakerConfig) -> Self {
    Self {
      config,
      state: Mutex::new(BreakerState {
        circuit: CircuitState::Closed,
        consecutive_failures: 0,
        last_failure: None,
        next_attempt: None,
        probing: false,
      }),
    }
  }

  /// Run `op` through the breaker.
  ///
  /// If the circuit is OPEN and the recovery window has not elapsed, the call
  /// fails immediately without invoking `op`. Otherwise the operation runs
  /// and its outcome is recorded: success closes the circuit and resets the
  /// failure counter, failure increments it and may open the circuit.
  pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
  where
    E: std::error::Error,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    self.before_call()?;

    match op().await {
      Ok(value) => {
        self.on_success();
        Ok(value)
      }
      Err(e) => {
        self.on_failure();
        Err(BreakerError::Inner(e))
      }
    }
  }

  /// Test-and-transition gate ahead of an attempt.
  fn before_call<E: std::error::Error>(&self) -> Result<(), BreakerError<E>> {
    let mut state = self.state.lock().unwrap();
    let now = Instant::now();

    match state.circuit {
      CircuitState::Closed => Ok(()),
      CircuitState::Open => {
        let next = state.next_attempt.unwrap_or(now);
        if now >= next {
          debug!("Recovery window elapsed, circuit half-open for trial call");
          state.circuit = CircuitState::HalfOpen;
          state.probing = true;
          Ok(())
        } else {
          Err(BreakerError::Open {
            retry_in: next.duration_since(now),
          })
        }
      }
      CircuitState::HalfOpen => {
        if state.probing {
          // Only one trial call at a time
          let retry_in = state
            .next_attempt
            .map(|next| next.saturating_duration_since(now))
            .unwrap_or_default();
          Err(BreakerError::Open { retry_in })
        } else {
          state.probing = true;
          Ok(())
        }
      }
    }
  }

  fn on_success(&self) {
    let mut state = self.state.lock().unwrap();
    if state.circuit != CircuitState::Closed {
      info!("Circuit closed after successful trial call");
    }
    state.circuit = CircuitState::Closed;
    state.consecutive_failures = 0;
    state.last_failure = None;
    state.next_attempt = None;
    state.probing = false;
  }

  fn on_failure(&self) {
    let mut state = self.state.lock().unwrap();
    let now = Instant::now();

    state.consecutive_failures += 1;
    state.last_failure = Some(now);
    state.probing = false;

    let should_open =
      state.circuit == CircuitState::HalfOpen || state.consecutive_failures >= self.config.failure_threshold;

    if should_open {
      warn!(
        consecutive_failures = state.consecutive_failures,
        recovery_timeout_ms = self.config.recovery_timeout.as_millis(),
        "Circuit opened"
      );
      state.circuit = CircuitState::Open;
      state.next_attempt = Some(now + self.config.recovery_timeout);
    }
  }

  pub fn current_state(&self) -> CircuitState {
    self.state.lock().unwrap().circuit
  }

  pub fn failure_count(&self) -> u32 {
    self.state.lock().unwrap().consecutive_failures
  }

  /// Force the breaker back to CLOSED. For diagnostics and test isolation.
  pub fn reset(&self) {
    self.on_success();
  }
}

impl Default for CircuitBreaker {
  fn default() -> Self {
    Self::new(BreakerConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, thiserror::Error)]
  #[error("boom")]
  struct TestError;

  fn breaker(threshold: u32, recovery_ms: u64) -> CircuitBreaker {
    CircuitBreaker::new(BreakerConfig {
      failure_threshold: threshold,
      recovery_timeout: Duration::from_millis(recovery_ms),
    })
  }

  async fn fail(b: &CircuitBreaker, attempts: &AtomicUsize) -> Result<(), BreakerError<TestError>> {
    b.execute(|| async {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>(TestError)
      })
      .await
  }

  async fn succeed(b: &CircuitBreaker, attempts: &AtomicUsize) -> Result<(), BreakerError<TestError>> {
    b.execute(|| async {
        attempts.fetch_add(1, Ordering::SeqCst);
        Ok::<(), TestError>(())
      })
      .await
  }

  #[tokio::test]
  async fn test_opens_after_threshold_consecutive_failures() {
    let b = breaker(3, 1000);
    let attempts = AtomicUsize::new(0);

    for _ in 0..2 {
      assert!(fail(&b, &attempts).await.is_err());
      assert_eq!(b.current_state(), CircuitState::Closed);
    }

    assert!(fail(&b, &attempts).await.is_err());
    assert_eq!(b.current_state(), CircuitState::Open);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_open_circuit_fails_fast_without_invoking_op() {
    let b = breaker(2, 1000);
    let attempts = AtomicUsize::new(0);

    let _ = fail(&b, &attempts).await;
    let _ = fail(&b, &attempts).await;
    assert_eq!(b.current_state(), CircuitState::Open);

    // Rejected without a network attempt
    let err = succeed(&b, &attempts).await.unwrap_err();
    assert!(err.is_open());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_success_resets_failure_counter() {
    let b = breaker(3, 1000);
    let attempts = AtomicUsize::new(0);

    let _ = fail(&b, &attempts).await;
    let _ = fail(&b, &attempts).await;
    assert_eq!(b.failure_count(), 2);

    succeed(&b, &attempts).await.unwrap();
    assert_eq!(b.failure_count(), 0);

    // Two more failures must not open a threshold-3 breaker
    let _ = fail(&b, &attempts).await;
    let _ = fail(&b, &attempts).await;
    assert_eq!(b.current_state(), CircuitState::Closed);
  }

  #[tokio::test]
  async fn test_half_open_trial_success_closes() {
    let b = breaker(2, 20);
    let attempts = AtomicUsize::new(0);

    let _ = fail(&b, &attempts).await;
    let _ = fail(&b, &attempts).await;
    assert_eq!(b.current_state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(30)).await;

    succeed(&b, &attempts).await.unwrap();
    assert_eq!(b.current_state(), CircuitState::Closed);
    assert_eq!(b.failure_count(), 0);
  }

  #[tokio::test]
  async fn test_half_open_trial_failure_reopens() {
    let b = breaker(2, 20);
    let attempts = AtomicUsize::new(0);

    let _ = fail(&b, &attempts).await;
    let _ = fail(&b, &attempts).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Trial call fails: circuit reopens with a fresh window
    let err = fail(&b, &attempts).await.unwrap_err();
    assert!(!err.is_open());
    assert_eq!(b.current_state(), CircuitState::Open);

    let err = succeed(&b, &attempts).await.unwrap_err();
    assert!(err.is_open());
  }

  #[tokio::test]
  async fn test_half_open_admits_single_trial() {
    let b = std::sync::Arc::new(breaker(1, 10));
    let _ = b
      .execute(|| async { Err::<(), _>(TestError) })
      .await;
    assert_eq!(b.current_state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(20)).await;

    // First caller enters the half-open trial and blocks on a channel
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let trial = {
      let b = b.clone();
      tokio::spawn(async move {
        b.execute(|| async {
            let _ = release_rx.await;
            Ok::<(), TestError>(())
          })
          .await
      })
    };

    // Give the trial a moment to claim the probe slot
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(b.current_state(), CircuitState::HalfOpen);

    // Second caller is rejected while the trial is in flight
    let err = b.execute(|| async { Ok::<(), TestError>(()) }).await.unwrap_err();
    assert!(err.is_open());

    release_tx.send(()).unwrap();
    trial.await.unwrap().unwrap();
    assert_eq!(b.current_state(), CircuitState::Closed);
  }

  #[tokio::test]
  async fn test_scenario_five_failures_then_recovery() {
    // failure_threshold=5: the sixth call is rejected without any attempt,
    // and after the recovery window the next call goes through normally.
    let b = breaker(5, 30);
    let attempts = AtomicUsize::new(0);

    for _ in 0..5 {
      assert!(fail(&b, &attempts).await.is_err());
    }
    assert_eq!(b.current_state(), CircuitState::Open);
    assert_eq!(attempts.load(Ordering::SeqCst), 5);

    let err = succeed(&b, &attempts).await.unwrap_err();
    assert!(err.is_open());
    assert_eq!(attempts.load(Ordering::SeqCst), 5);

    tokio::time::sleep(Duration::from_millis(40)).await;

    succeed(&b, &attempts).await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 6);
    assert_eq!(b.current_state(), CircuitState::Closed);
  }

  #[tokio::test]
  async fn test_reset_forces_closed() {
    let b = breaker(1, 60_000);
    let attempts = AtomicUsize::new(0);

    let _ = fail(&b, &attempts).await;
    assert_eq!(b.current_state(), CircuitState::Open);

    b.reset();
    assert_eq!(b.current_state(), CircuitState::Closed);
    succeed(&b, &attempts).await.unwrap();
  }
}
