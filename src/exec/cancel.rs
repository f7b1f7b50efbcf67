// Copyright 2018-2025 the Deno authors. MIT license.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;

use super::error::CancelReason;

#[derive(Debug)]
struct CancelSignalInner {
  // first reason wins
  reason: watch::Sender<Option<CancelReason>>,
  deadline: Option<Instant>,
  children: Mutex<Vec<Weak<CancelSignalInner>>>,
}

impl CancelSignalInner {
  fn new(reason: Option<CancelReason>, deadline: Option<Instant>) -> Self {
    let (sender, _) = watch::channel(reason);
    Self {
      reason: sender,
      deadline,
      children: Default::default(),
    }
  }

  fn cancel(&self, reason: CancelReason) {
    let changed = self.reason.send_if_modified(|current| {
      if current.is_none() {
        *current = Some(reason);
        true
      } else {
        false
      }
    });
    if !changed {
      return;
    }

    // notify children
    self.children.lock().retain(|weak_child| {
      if let Some(child) = weak_child.upgrade() {
        child.cancel(reason);
        true
      } else {
        false // clean-up dropped children
      }
    });
  }

  fn reason(&self) -> Option<CancelReason> {
    let current = *self.reason.borrow();
    if current.is_some() {
      return current;
    }
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => {
        self.cancel(CancelReason::DeadlineExceeded);
        *self.reason.borrow()
      }
      _ => None,
    }
  }
}

/// Cancellation signal that can be bound to the stages of a command.
///
/// When a bound signal fires, the stage's process is killed and the
/// stage reports the cancellation as its error. Cancelling a signal
/// cancels every signal derived from it, never its parent.
#[derive(Debug, Clone)]
pub struct CancelSignal(Arc<CancelSignalInner>);

impl Default for CancelSignal {
  fn default() -> Self {
    Self(Arc::new(CancelSignalInner::new(None, None)))
  }
}

impl CancelSignal {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cancels this signal and all of its descendants.
  pub fn cancel(&self) {
    self.0.cancel(CancelReason::Canceled);
  }

  /// Why the signal fired, or `None` while it has not.
  pub fn reason(&self) -> Option<CancelReason> {
    self.0.reason()
  }

  pub fn is_cancelled(&self) -> bool {
    self.reason().is_some()
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.0.deadline
  }

  /// Creates a signal that fires when this one does and can also be
  /// cancelled on its own without affecting this one.
  pub fn child_signal(&self) -> Self {
    self.derive(self.0.deadline)
  }

  /// Derives a child signal that additionally fires after `timeout`.
  pub fn with_timeout(&self, timeout: Duration) -> Self {
    match Instant::now().checked_add(timeout) {
      Some(deadline) => self.with_deadline(deadline),
      None => self.child_signal(),
    }
  }

  /// Derives a child signal that additionally fires at `deadline`.
  /// The earlier of the parent's deadline and `deadline` applies.
  pub fn with_deadline(&self, deadline: Instant) -> Self {
    let deadline = match self.0.deadline {
      Some(parent) => parent.min(deadline),
      None => deadline,
    };
    self.derive(Some(deadline))
  }

  fn derive(&self, deadline: Option<Instant>) -> Self {
    // `cancel` publishes the reason before walking the children, so
    // reading it under the lock means either the child starts cancelled
    // or `cancel` finds it in the list
    let mut children = self.0.children.lock();
    children.retain(|child| child.strong_count() > 0);
    let reason = *self.0.reason.borrow();
    let child = Arc::new(CancelSignalInner::new(reason, deadline));
    children.push(Arc::downgrade(&child));
    Self(child)
  }

  /// Creates a `CancelGuard` that cancels the signal on drop.
  pub fn drop_guard(self) -> CancelGuard {
    CancelGuard {
      disarmed: false,
      signal: self,
    }
  }

  /// Resolves once the signal fires.
  pub async fn cancelled(&self) -> CancelReason {
    let mut receiver = self.0.reason.subscribe();
    let fired = async move {
      // the sender lives in `self`, so the channel can't close
      match receiver.wait_for(Option::is_some).await {
        Ok(reason) => (*reason).unwrap_or(CancelReason::Canceled),
        Err(_) => CancelReason::Canceled,
      }
    };
    match self.0.deadline {
      Some(deadline) => {
        tokio::select! {
          reason = fired => reason,
          _ = tokio::time::sleep_until(deadline.into()) => {
            self.0.cancel(CancelReason::DeadlineExceeded);
            self.reason().unwrap_or(CancelReason::DeadlineExceeded)
          }
        }
      }
      None => fired.await,
    }
  }
}

/// Guard that cancels the associated `CancelSignal` on drop.
#[derive(Debug)]
pub struct CancelGuard {
  disarmed: bool,
  signal: CancelSignal,
}

impl CancelGuard {
  /// Prevent the guard from cancelling on drop.
  pub fn disarm(mut self) -> CancelSignal {
    self.disarmed = true;
    self.signal.clone()
  }

  pub fn signal(&self) -> &CancelSignal {
    &self.signal
  }
}

impl Drop for CancelGuard {
  fn drop(&mut self) {
    if !self.disarmed {
      self.signal.cancel();
    }
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;
  use std::time::Instant;

  use super::CancelSignal;
  use crate::CancelReason;

  #[tokio::test]
  async fn cancel_and_wait() {
    let signal = CancelSignal::new();
    let sender = signal.clone();
    tokio::spawn(async move {
      sender.cancel();
    });
    assert_eq!(signal.cancelled().await, CancelReason::Canceled);
    assert_eq!(signal.reason(), Some(CancelReason::Canceled));
  }

  #[tokio::test]
  async fn propagates_to_descendants_only() {
    let parent = CancelSignal::new();
    let child = parent.child_signal();
    let sibling = parent.child_signal();
    let grandchild = child.child_signal();

    child.cancel();
    assert!(parent.reason().is_none());
    assert!(sibling.reason().is_none());
    assert!(child.is_cancelled());
    assert!(grandchild.is_cancelled());

    parent.cancel();
    assert_eq!(
      sibling.cancelled().await,
      CancelReason::Canceled
    );
  }

  #[tokio::test]
  async fn deadline_fires() {
    let signal = CancelSignal::new().with_timeout(Duration::from_millis(20));
    assert!(signal.reason().is_none());
    let start = Instant::now();
    assert_eq!(
      signal.cancelled().await,
      CancelReason::DeadlineExceeded
    );
    assert!(start.elapsed() >= Duration::from_millis(15));
    assert_eq!(
      signal.reason(),
      Some(CancelReason::DeadlineExceeded)
    );
  }

  #[test]
  fn expired_deadline_is_observed_without_runtime() {
    let signal = CancelSignal::new().with_deadline(Instant::now());
    assert_eq!(
      signal.reason(),
      Some(CancelReason::DeadlineExceeded)
    );
  }

  #[test]
  fn child_keeps_earlier_parent_deadline() {
    let parent = CancelSignal::new().with_timeout(Duration::from_secs(1));
    let child = parent.with_timeout(Duration::from_secs(60));
    assert_eq!(child.deadline(), parent.deadline());
  }

  #[test]
  fn child_of_cancelled_parent_starts_cancelled() {
    let parent = CancelSignal::new();
    parent.cancel();
    assert!(parent.child_signal().is_cancelled());
  }

  #[test]
  fn derive_never_misses_concurrent_cancel() {
    for _ in 0..2000 {
      let parent = CancelSignal::new();
      let canceller = parent.clone();
      let child = std::thread::scope(|scope| {
        scope.spawn(move || canceller.cancel());
        parent.child_signal()
      });
      assert!(child.is_cancelled());
    }
  }

  #[test]
  fn dropped_children_are_released() {
    let parent = CancelSignal::new();
    let kept = parent.child_signal();
    for _ in 0..1000 {
      drop(parent.with_timeout(Duration::from_secs(60)));
    }
    assert!(parent.0.children.lock().len() <= 2);
    parent.cancel();
    assert!(kept.is_cancelled());
  }

  #[test]
  fn drop_guard() {
    let signal = CancelSignal::new();
    {
      let guard = signal.clone().drop_guard();
      guard.disarm();
    }
    assert!(!signal.is_cancelled());

    {
      let _guard = signal.clone().drop_guard();
    }
    assert_eq!(signal.reason(), Some(CancelReason::Canceled));
  }
}
