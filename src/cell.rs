use std::{
  panic::{catch_unwind, AssertUnwindSafe},
  sync::{Arc, Mutex, Weak},
};

use smallvec::SmallVec;
use tracing::error;

/// Handle to an active registration, able to cancel it.
pub trait Subscription {
  /// Deregister. Idempotent: calling it on an already-removed registration is
  /// a no-op. An in-flight notification for this observer runs to completion;
  /// no later one starts.
  fn unsubscribe(self);

  fn is_closed(&self) -> bool;
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Observer table keyed by monotonically increasing ids, so removal by handle
/// never confuses two registrations of the same callback.
struct Observers<T> {
  next_id: usize,
  table: SmallVec<[(usize, Callback<T>); 2]>,
}

impl<T> Default for Observers<T> {
  fn default() -> Self { Self { next_id: 0, table: SmallVec::new() } }
}

impl<T> Observers<T> {
  fn add(&mut self, callback: Callback<T>) -> usize {
    let id = self.next_id;
    self.next_id += 1;
    self.table.push((id, callback));
    id
  }

  fn remove(&mut self, id: usize) -> Option<Callback<T>> {
    self
      .table
      .iter()
      .position(|(i, _)| *i == id)
      .map(|pos| self.table.remove(pos).1)
  }

  fn contains(&self, id: usize) -> bool { self.table.iter().any(|(i, _)| *i == id) }

  /// Registration-order copy of the callbacks, decoupling iteration from
  /// table mutation.
  fn snapshot(&self) -> SmallVec<[Callback<T>; 2]> {
    self.table.iter().map(|(_, cb)| cb.clone()).collect()
  }
}

struct CellState<T> {
  value: T,
  observers: Observers<T>,
}

/// A thread-safe single-slot value store with synchronous observer fan-out.
///
/// The cell holds the latest published value; [`update`](Self::update) stores
/// a new one and notifies every registered observer in registration order, on
/// the updating thread. Handles are cheap to clone and all clones share the
/// same slot.
///
/// Racing updates are last-write-wins: each `update` call notifies with the
/// value it was given, snapshot capture is serialized by the internal lock,
/// and the slot converges to the final writer. There is no per-observer
/// queue and no replay of the current value on subscribe.
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use steady::prelude::*;
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let cell = ReactiveCell::new(0);
///
/// let sink = seen.clone();
/// cell.subscribe(move |v| sink.lock().unwrap().push(*v));
///
/// cell.update(1);
/// cell.update(2);
/// assert_eq!(cell.current(), 2);
/// assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
/// ```
pub struct ReactiveCell<T> {
  state: Arc<Mutex<CellState<T>>>,
}

impl<T> Clone for ReactiveCell<T> {
  fn clone(&self) -> Self { Self { state: self.state.clone() } }
}

impl<T> ReactiveCell<T> {
  /// A cell seeded with `initial`.
  pub fn new(initial: T) -> Self {
    Self {
      state: Arc::new(Mutex::new(CellState {
        value: initial,
        observers: Observers::default(),
      })),
    }
  }

  /// Publish `value` and notify observers registered before this call, in
  /// registration order, synchronously on the calling thread.
  ///
  /// No internal lock is held while observers run, so an observer may
  /// subscribe, unsubscribe, or update this same cell without deadlocking.
  /// A panicking observer is caught and logged; its siblings still run.
  pub fn update(&self, value: T)
  where
    T: Clone,
  {
    let snapshot = {
      let mut state = self.state.lock().unwrap();
      state.value = value.clone();
      state.observers.snapshot()
    };
    for callback in snapshot {
      if catch_unwind(AssertUnwindSafe(|| callback(&value))).is_err() {
        error!("cell observer panicked during notification; continuing with remaining observers");
      }
    }
  }

  /// The value currently stored. Non-blocking, no side effects.
  pub fn current(&self) -> T
  where
    T: Clone,
  {
    self.state.lock().unwrap().value.clone()
  }

  /// Register `callback` for every future update. The current value is not
  /// replayed.
  pub fn subscribe<F>(&self, callback: F) -> CellSubscription<T>
  where
    F: Fn(&T) + Send + Sync + 'static,
  {
    let id = self
      .state
      .lock()
      .unwrap()
      .observers
      .add(Arc::new(callback));
    CellSubscription { state: Arc::downgrade(&self.state), id }
  }

  /// Number of live registrations.
  pub fn subscriber_count(&self) -> usize {
    self.state.lock().unwrap().observers.table.len()
  }
}

/// Registration handle returned by [`ReactiveCell::subscribe`].
///
/// Holds only a weak back-reference: dropping every cell handle frees the
/// cell even while subscriptions are alive. Dropping the handle does NOT
/// unsubscribe; call [`Subscription::unsubscribe`].
pub struct CellSubscription<T> {
  state: Weak<Mutex<CellState<T>>>,
  id: usize,
}

impl<T> Clone for CellSubscription<T> {
  fn clone(&self) -> Self { Self { state: self.state.clone(), id: self.id } }
}

impl<T> Subscription for CellSubscription<T> {
  fn unsubscribe(self) {
    if let Some(state) = self.state.upgrade() {
      state.lock().unwrap().observers.remove(self.id);
    }
  }

  fn is_closed(&self) -> bool {
    match self.state.upgrade() {
      Some(state) => !state.lock().unwrap().observers.contains(self.id),
      None => true,
    }
  }
}
