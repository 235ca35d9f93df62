//! Per-attribute resolution state.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, Shared};
use std::sync::{Mutex, MutexGuard};

use crate::error::FetchError;
use crate::view::ViewMode;

/// Outcome of an in-flight resolution, awaitable by any number of waiters.
pub(crate) type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

/// Lifecycle of one attribute of one entity.
pub(crate) enum CacheSlot<T> {
  Unresolved,
  Pending(SharedOutcome<T>),
  Resolved {
    value: T,
    resolved_at: DateTime<Utc>,
  },
  Failed(FetchError),
}

/// State of a slot without its payload, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
  Unresolved,
  Pending,
  Resolved,
  Failed,
}

/// What a reader has to do after inspecting the slot.
pub(crate) enum Step<T> {
  /// Memoized value, no suspension needed
  Ready(T),
  /// Join the in-flight resolution
  Wait(SharedOutcome<T>),
  /// Read the record store; the generation guards the write-back
  ReadOffline(u64),
}

struct Inner<T> {
  slot: CacheSlot<T>,
  /// Bumped on invalidation so late completions of older fetches are dropped
  generation: u64,
}

pub(crate) struct SlotCell<T> {
  inner: Mutex<Inner<T>>,
}

impl<T: Clone> SlotCell<T> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        slot: CacheSlot::Unresolved,
        generation: 0,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner<T>> {
    // State transitions never panic midway, so a poisoned lock still holds a
    // consistent slot.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Decide how to serve a read.
  ///
  /// Observing a miss and marking the slot Pending happen under one lock, so
  /// two readers can never both start a fetch. `start` runs under that lock
  /// and must not block.
  pub(crate) fn acquire<F>(&self, mode: ViewMode, stale_after: Option<Duration>, start: F) -> Step<T>
  where
    F: FnOnce(u64) -> SharedOutcome<T>,
  {
    let mut inner = self.lock();

    match &inner.slot {
      CacheSlot::Resolved { value, resolved_at } => {
        let expired = mode == ViewMode::Online
          && stale_after.is_some_and(|max_age| Utc::now() - *resolved_at > max_age);
        if !expired {
          return Step::Ready(value.clone());
        }
      }
      CacheSlot::Pending(outcome) => return Step::Wait(outcome.clone()),
      CacheSlot::Unresolved | CacheSlot::Failed(_) => {}
    }

    match mode {
      ViewMode::Online => {
        let outcome = start(inner.generation);
        inner.slot = CacheSlot::Pending(outcome.clone());
        Step::Wait(outcome)
      }
      ViewMode::Offline => Step::ReadOffline(inner.generation),
    }
  }

  /// Record the outcome of a transport-backed fetch.
  pub(crate) fn finish_fetch(&self, generation: u64, outcome: &Result<T, FetchError>) {
    let mut inner = self.lock();
    if inner.generation != generation || !matches!(inner.slot, CacheSlot::Pending(_)) {
      return;
    }
    inner.slot = settled(outcome);
  }

  /// Record the outcome of a record store read.
  ///
  /// A miss leaves the slot untouched so a later online read can succeed.
  pub(crate) fn finish_offline(&self, generation: u64, outcome: &Result<T, FetchError>) {
    let mut inner = self.lock();
    if inner.generation != generation {
      return;
    }
    if let Err(e) = outcome {
      if e.is_not_available_offline() {
        return;
      }
    }
    match inner.slot {
      CacheSlot::Unresolved | CacheSlot::Failed(_) => inner.slot = settled(outcome),
      CacheSlot::Pending(_) | CacheSlot::Resolved { .. } => {}
    }
  }

  /// Reset to Unresolved; a running fetch can no longer settle the slot.
  pub(crate) fn invalidate(&self) {
    let mut inner = self.lock();
    inner.generation += 1;
    inner.slot = CacheSlot::Unresolved;
  }

  /// Install a value obtained out of band.
  pub(crate) fn prime(&self, value: T) {
    let mut inner = self.lock();
    inner.generation += 1;
    inner.slot = CacheSlot::Resolved {
      value,
      resolved_at: Utc::now(),
    };
  }

  pub(crate) fn peek(&self) -> Option<T> {
    match &self.lock().slot {
      CacheSlot::Resolved { value, .. } => Some(value.clone()),
      _ => None,
    }
  }

  pub(crate) fn resolved_at(&self) -> Option<DateTime<Utc>> {
    match &self.lock().slot {
      CacheSlot::Resolved { resolved_at, .. } => Some(*resolved_at),
      _ => None,
    }
  }

  pub(crate) fn state(&self) -> SlotState {
    match &self.lock().slot {
      CacheSlot::Unresolved => SlotState::Unresolved,
      CacheSlot::Pending(_) => SlotState::Pending,
      CacheSlot::Resolved { .. } => SlotState::Resolved,
      CacheSlot::Failed(_) => SlotState::Failed,
    }
  }

  pub(crate) fn last_error(&self) -> Option<FetchError> {
    match &self.lock().slot {
      CacheSlot::Failed(e) => Some(e.clone()),
      _ => None,
    }
  }
}

fn settled<T: Clone>(outcome: &Result<T, FetchError>) -> CacheSlot<T> {
  match outcome {
    Ok(value) => CacheSlot::Resolved {
      value: value.clone(),
      resolved_at: Utc::now(),
    },
    Err(e) => CacheSlot::Failed(e.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key::EntityKey;
  use futures::FutureExt;

  fn ready(value: &'static str) -> SharedOutcome<String> {
    futures::future::ready(Ok(value.to_string())).boxed().shared()
  }

  fn offline_miss() -> FetchError {
    FetchError::NotAvailableOffline {
      key: EntityKey::new("user", "1"),
      attribute: "name".to_string(),
    }
  }

  #[test]
  fn test_online_miss_marks_pending_once() {
    let cell = SlotCell::<String>::new();
    let mut starts = 0;

    let first = cell.acquire(ViewMode::Online, None, |_| {
      starts += 1;
      ready("a")
    });
    assert!(matches!(first, Step::Wait(_)));
    assert_eq!(cell.state(), SlotState::Pending);

    let second = cell.acquire(ViewMode::Online, None, |_| {
      starts += 1;
      ready("b")
    });
    assert!(matches!(second, Step::Wait(_)));
    assert_eq!(starts, 1);
  }

  #[test]
  fn test_resolved_is_served_without_starting() {
    let cell = SlotCell::<String>::new();
    let generation = match cell.acquire(ViewMode::Online, None, |_| ready("a")) {
      Step::Wait(_) => 0,
      _ => panic!("expected a fetch to start"),
    };
    cell.finish_fetch(generation, &Ok("a".to_string()));

    match cell.acquire(ViewMode::Online, None, |_| panic!("must not start")) {
      Step::Ready(v) => assert_eq!(v, "a"),
      _ => panic!("expected memoized value"),
    }
    assert_eq!(cell.peek(), Some("a".to_string()));
    assert!(cell.resolved_at().is_some());
  }

  #[test]
  fn test_failed_is_not_sticky() {
    let cell = SlotCell::<String>::new();
    cell.acquire(ViewMode::Online, None, |_| ready("a"));
    cell.finish_fetch(0, &Err(offline_miss()));
    assert_eq!(cell.state(), SlotState::Failed);
    assert!(cell.last_error().is_some());

    let mut restarted = false;
    cell.acquire(ViewMode::Online, None, |_| {
      restarted = true;
      ready("a")
    });
    assert!(restarted);
  }

  #[test]
  fn test_invalidate_drops_late_completion() {
    let cell = SlotCell::<String>::new();
    cell.acquire(ViewMode::Online, None, |_| ready("old"));
    cell.invalidate();
    cell.finish_fetch(0, &Ok("old".to_string()));
    assert_eq!(cell.state(), SlotState::Unresolved);
    assert_eq!(cell.peek(), None);
  }

  #[test]
  fn test_offline_miss_leaves_slot_unresolved() {
    let cell = SlotCell::<String>::new();
    let generation = match cell.acquire(ViewMode::Offline, None, |_| panic!("no fetch offline")) {
      Step::ReadOffline(g) => g,
      _ => panic!("expected a store read"),
    };
    cell.finish_offline(generation, &Err(offline_miss()));
    assert_eq!(cell.state(), SlotState::Unresolved);

    cell.finish_offline(generation, &Ok("stored".to_string()));
    assert_eq!(cell.peek(), Some("stored".to_string()));
  }

  #[test]
  fn test_stale_after_only_applies_online() {
    let cell = SlotCell::<String>::new();
    cell.prime("a".to_string());
    let max_age = Some(Duration::zero() - Duration::seconds(1));

    assert!(matches!(
      cell.acquire(ViewMode::Offline, max_age, |_| panic!("no fetch offline")),
      Step::Ready(_)
    ));
    assert!(matches!(
      cell.acquire(ViewMode::Online, max_age, |_| ready("b")),
      Step::Wait(_)
    ));
  }
}
