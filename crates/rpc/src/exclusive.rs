//! At-most-one in-flight guard for conversational requests.
//!
//! A new chat/edit/generate request aborts any previous one of the same kind
//! before starting. Indexing traffic never goes through this guard; it is
//! only for user-driven requests where a stale answer has no value.

use std::sync::Mutex;

use futures::future::{AbortHandle, Abortable};
use tracing::debug;

#[derive(Default)]
pub struct ExclusiveRequest {
  current: Mutex<Option<AbortHandle>>,
}

impl ExclusiveRequest {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `fut`, aborting whichever request was previously in flight.
  ///
  /// Returns `None` when this request was itself aborted by a newer one.
  pub async fn run<F, T>(&self, fut: F) -> Option<T>
  where
    F: std::future::Future<Output = T>,
  {
    let (handle, registration) = AbortHandle::new_pair();

    if let Some(previous) = self.current.lock().unwrap().replace(handle) {
      debug!("Aborting previous in-flight request");
      previous.abort();
    }

    Abortable::new(fut, registration).await.ok()
  }

  /// Abort the current in-flight request, if any.
  pub fn cancel(&self) {
    if let Some(handle) = self.current.lock().unwrap().take() {
      handle.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{sync::Arc, time::Duration};

  #[tokio::test]
  async fn test_completed_request_returns_value() {
    let guard = ExclusiveRequest::new();
    let result = guard.run(async { 42 }).await;
    assert_eq!(result, Some(42));
  }

  #[tokio::test]
  async fn test_new_request_aborts_previous() {
    let guard = Arc::new(ExclusiveRequest::new());

    let first = {
      let guard = guard.clone();
      tokio::spawn(async move {
        guard
          .run(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            "first"
          })
          .await
      })
    };

    // Let the first request claim the slot before superseding it
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = guard.run(async { "second" }).await;
    assert_eq!(second, Some("second"));

    // The superseded request resolves to None instead of hanging
    let first = tokio::time::timeout(Duration::from_secs(1), first).await.unwrap().unwrap();
    assert_eq!(first, None);
  }

  #[tokio::test]
  async fn test_cancel_aborts_in_flight() {
    let guard = Arc::new(ExclusiveRequest::new());

    let task = {
      let guard = guard.clone();
      tokio::spawn(async move {
        guard
          .run(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
          })
          .await
      })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    guard.cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(result, None);
  }

  #[tokio::test]
  async fn test_cancel_with_nothing_in_flight_is_noop() {
    let guard = ExclusiveRequest::new();
    guard.cancel();

    let result = guard.run(async { 1 }).await;
    assert_eq!(result, Some(1));
  }
}
