use std::sync::Arc;

use thiserror::Error;
use tokio::{
  sync::watch,
  time::{sleep_until, Duration, Instant},
};

/// Reason a [`Context`] stopped being live.
///
/// Retrievable after the fact via [`Context::err`], so callers can tell
/// "told to stop" apart from "ran out of time".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ContextError {
  /// [`Context::cancel`] was called.
  #[error("context cancelled")]
  Cancelled,
  /// The context's deadline passed.
  #[error("deadline exceeded")]
  DeadlineExceeded,
}

/// A cancellation scope with an optional deadline.
///
/// `Context` is the done-signal every blocking operation in this crate races
/// against: [`ReadyCell::wait`](crate::ready::ReadyCell::wait) and
/// [`Retrier::next`](crate::retry::Retrier::next) both return early once the
/// scope fires, and the [`poll`](crate::source::poll) worker exits its loop.
///
/// Handles are cheap to clone and every clone observes the same scope. Once
/// fired the scope stays fired; the first recorded reason wins.
///
/// ```rust
/// use steady::prelude::*;
///
/// let ctx = Context::new();
/// assert!(!ctx.is_cancelled());
/// ctx.cancel();
/// assert_eq!(ctx.err(), Some(ContextError::Cancelled));
/// ```
#[derive(Clone, Debug)]
pub struct Context {
  state: Arc<watch::Sender<Option<ContextError>>>,
  deadline: Option<Instant>,
}

impl Default for Context {
  fn default() -> Self { Self::new() }
}

impl Context {
  /// A context that stays live until [`cancel`](Self::cancel) is called.
  pub fn new() -> Self {
    Self { state: Arc::new(watch::Sender::new(None)), deadline: None }
  }

  /// A context that fires `timeout` from now, or when cancelled explicitly,
  /// whichever happens first.
  pub fn with_timeout(timeout: Duration) -> Self {
    Self::with_deadline(Instant::now() + timeout)
  }

  /// A context that fires at `deadline`, or when cancelled explicitly,
  /// whichever happens first.
  pub fn with_deadline(deadline: Instant) -> Self {
    Self {
      state: Arc::new(watch::Sender::new(None)),
      deadline: Some(deadline),
    }
  }

  /// Cancel the scope. Idempotent; a reason already recorded (including a
  /// deadline that has already passed) is kept.
  pub fn cancel(&self) {
    self.stamp_expired_deadline();
    self.record(ContextError::Cancelled);
  }

  /// Resolves once the scope fires, yielding the recorded reason. Resolves
  /// immediately if it has fired already.
  pub async fn done(&self) -> ContextError {
    let mut rx = self.state.subscribe();
    match self.deadline {
      Some(deadline) => {
        tokio::select! {
          _ = rx.wait_for(|reason| reason.is_some()) => {}
          _ = sleep_until(deadline) => {
            self.record(ContextError::DeadlineExceeded);
          }
        }
      }
      None => {
        let _ = rx.wait_for(|reason| reason.is_some()).await;
      }
    }
    self.err().unwrap_or(ContextError::Cancelled)
  }

  /// Whether the scope has fired, by cancellation or deadline.
  pub fn is_cancelled(&self) -> bool { self.err().is_some() }

  /// The recorded reason, or `None` while the scope is live.
  pub fn err(&self) -> Option<ContextError> {
    self.stamp_expired_deadline();
    *self.state.borrow()
  }

  fn record(&self, reason: ContextError) {
    self.state.send_if_modified(|state| {
      if state.is_none() {
        *state = Some(reason);
        true
      } else {
        false
      }
    });
  }

  /// A deadline can pass without anyone awaiting `done`; fold it into the
  /// recorded state lazily so `err` and `is_cancelled` agree with it.
  fn stamp_expired_deadline(&self) {
    if let Some(deadline) = self.deadline {
      if Instant::now() >= deadline {
        self.record(ContextError::DeadlineExceeded);
      }
    }
  }
}
