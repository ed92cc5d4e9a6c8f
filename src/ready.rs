use std::sync::Arc;

use tokio::sync::watch;

use crate::{
  cell::{CellSubscription, ReactiveCell},
  context::{Context, ContextError},
};

/// A [`ReactiveCell`] with a one-shot readiness gate.
///
/// The cell starts out holding `T::default()` and "not ready". The very first
/// [`update`](Self::update) fires the gate, permanently; later updates change
/// the value but never re-arm the gate. [`wait`](Self::wait) blocks callers
/// until that first value lands or their context fires, whichever comes
/// first.
///
/// ```rust
/// use steady::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let cell = ReadyCell::new();
/// assert!(!cell.is_ready());
/// assert_eq!(cell.current(), 0); // the zero value, not a published one
///
/// cell.update(5);
/// let value = cell.wait(&Context::new()).await.unwrap();
/// assert_eq!(value, 5);
/// # }
/// ```
pub struct ReadyCell<T> {
  cell: ReactiveCell<T>,
  gate: Arc<watch::Sender<bool>>,
}

impl<T> Clone for ReadyCell<T> {
  fn clone(&self) -> Self {
    Self { cell: self.cell.clone(), gate: self.gate.clone() }
  }
}

impl<T: Default> Default for ReadyCell<T> {
  fn default() -> Self { Self::new() }
}

impl<T: Default> ReadyCell<T> {
  /// A not-ready cell holding `T::default()`.
  pub fn new() -> Self {
    Self {
      cell: ReactiveCell::new(T::default()),
      gate: Arc::new(watch::Sender::new(false)),
    }
  }
}

impl<T> ReadyCell<T> {
  /// Publish `value`, then fire the readiness gate if this was the first
  /// publication ever.
  pub fn update(&self, value: T)
  where
    T: Clone,
  {
    self.cell.update(value);
    self.gate.send_if_modified(|armed| {
      if *armed {
        false
      } else {
        *armed = true;
        true
      }
    });
  }

  /// Resolves once the first value has been published. Resolves immediately
  /// forever after.
  pub async fn ready(&self) {
    let mut rx = self.gate.subscribe();
    let _ = rx.wait_for(|armed| *armed).await;
  }

  /// Whether a value has ever been published.
  pub fn is_ready(&self) -> bool { *self.gate.borrow() }

  /// Block until the gate fires, returning the current value, or until `ctx`
  /// fires, returning its reason.
  pub async fn wait(&self, ctx: &Context) -> Result<T, ContextError>
  where
    T: Clone,
  {
    tokio::select! {
      _ = self.ready() => Ok(self.current()),
      reason = ctx.done() => Err(reason),
    }
  }

  /// The stored value: `T::default()` before readiness, the latest published
  /// value after.
  #[inline]
  pub fn current(&self) -> T
  where
    T: Clone,
  {
    self.cell.current()
  }

  /// Register an observer for future updates. Forward-only, like
  /// [`ReactiveCell::subscribe`].
  #[inline]
  pub fn subscribe<F>(&self, callback: F) -> CellSubscription<T>
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    self.cell.subscribe(callback)
  }

  #[inline]
  pub fn subscriber_count(&self) -> usize { self.cell.subscriber_count() }
}
