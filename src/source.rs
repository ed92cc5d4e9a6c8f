use std::future::Future;

use futures::{FutureExt, Stream, StreamExt};
use tokio::{
  sync::mpsc,
  time::{interval, Duration, MissedTickBehavior},
};
use tracing::debug;

use crate::{cell::Subscription, context::Context, ready::ReadyCell};

/// Drain an externally-owned unbounded channel into a [`ReadyCell`].
///
/// Values already enqueued when this is called are drained synchronously, so
/// the returned cell is ready before the constructor returns — an early
/// reader can never observe "not ready" while data sits in the channel.
/// Remaining values drain FIFO on a background task, each published via
/// `update`. When the sender side closes, the task exits silently and the
/// cell keeps returning the last published value.
///
/// Must be called within a tokio runtime.
pub fn from_receiver<T>(mut source: mpsc::UnboundedReceiver<T>) -> ReadyCell<T>
where
  T: Clone + Default + Send + 'static,
{
  let cell = ReadyCell::new();
  while let Ok(value) = source.try_recv() {
    cell.update(value);
  }
  let feed = cell.clone();
  tokio::spawn(async move {
    while let Some(value) = source.recv().await {
      feed.update(value);
    }
    debug!("channel source closed; drain worker exiting");
  });
  cell
}

/// [`from_receiver`] for any [`Stream`].
///
/// Items the stream can yield without waiting are drained synchronously at
/// construction, with the same no-race guarantee. A stream that is already
/// exhausted produces a never-ready cell holding `T::default()`.
pub fn from_stream<S>(mut source: S) -> ReadyCell<S::Item>
where
  S: Stream + Send + Unpin + 'static,
  S::Item: Clone + Default + Send + 'static,
{
  let cell = ReadyCell::new();
  loop {
    match source.next().now_or_never() {
      Some(Some(value)) => cell.update(value),
      Some(None) => return cell,
      None => break,
    }
  }
  let feed = cell.clone();
  tokio::spawn(async move {
    while let Some(value) = source.next().await {
      feed.update(value);
    }
    debug!("stream source ended; drain worker exiting");
  });
  cell
}

/// Stop handle for a [`poll`] worker.
///
/// Unsubscribing stops the background polling task without touching values
/// already published. `is_closed` reflects explicit unsubscription, not the
/// parent context.
pub struct PollSubscription {
  stop: Context,
}

impl Subscription for PollSubscription {
  fn unsubscribe(self) { self.stop.cancel(); }

  fn is_closed(&self) -> bool { self.stop.is_cancelled() }
}

/// Poll `provider` on a fixed cadence into a [`ReadyCell`].
///
/// The first poll happens immediately. A `None` result is discarded: nothing
/// is published and the gate does not fire. Polls never overlap — the
/// provider is awaited inline, so a slow poll delays the next tick rather
/// than running concurrently with itself.
///
/// The worker stops when `ctx` fires or when the returned subscription is
/// unsubscribed. `every` must be non-zero.
///
/// Must be called within a tokio runtime.
pub fn poll<T, F, Fut>(
  ctx: &Context,
  every: Duration,
  mut provider: F,
) -> (ReadyCell<T>, PollSubscription)
where
  T: Clone + Default + Send + 'static,
  F: FnMut(Context) -> Fut + Send + 'static,
  Fut: Future<Output = Option<T>> + Send + 'static,
{
  let cell = ReadyCell::new();
  let stop = Context::new();

  let feed = cell.clone();
  let ctx = ctx.clone();
  let halt = stop.clone();
  tokio::spawn(async move {
    let mut ticks = interval(every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      // biased: a fired stop signal always wins over a pending tick
      tokio::select! {
        biased;
        reason = ctx.done() => {
          debug!(?reason, "poll worker stopping with its context");
          break;
        }
        _ = halt.done() => {
          debug!("poll worker unsubscribed");
          break;
        }
        _ = ticks.tick() => {
          if let Some(value) = provider(ctx.clone()).await {
            feed.update(value);
          }
        }
      }
    }
  });

  (cell, PollSubscription { stop })
}
