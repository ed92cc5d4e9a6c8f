//! Bounded exponential-backoff retry driver.
//!
//! [`Retrier`] owns the schedule: attempt counting, geometric backoff with a
//! cap, optional jitter, and cancellation via a bound [`Context`]. The caller
//! owns the loop:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use steady::prelude::*;
//!
//! # async fn fetch() -> Result<(), std::io::Error> { Ok(()) }
//! # async fn demo() {
//! let ctx = Context::new();
//! let config = RetryConfig::new(Duration::from_millis(100))
//!   .multiplier(2.0)
//!   .max_backoff(Duration::from_secs(5))
//!   .max_attempts(10);
//!
//! let mut driver = Retrier::start(&ctx, config);
//! while driver.next().await {
//!   if fetch().await.is_ok() {
//!     break;
//!   }
//! }
//! # }
//! ```
//!
//! [`retry`] wraps that loop for the common run-until-success case.

use std::future::Future;

use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use crate::context::{Context, ContextError};

/// Why a [`retry`] loop gave up.
///
/// `Exhausted` carries the action's final error untouched, so callers can
/// pattern-match on it; `Cancelled` means the loop was told to stop, which is
/// deliberately distinguishable from running out of attempts.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
  /// Every configured attempt failed; the payload is the last failure.
  #[error("retry attempts exhausted")]
  Exhausted(#[source] E),
  /// The bound context fired before the action succeeded.
  #[error("retry aborted: {0}")]
  Cancelled(ContextError),
}

impl<E: std::error::Error + 'static> RetryError<E> {
  /// The final action error, if the loop ended by exhaustion.
  pub fn into_inner(self) -> Option<E> {
    match self {
      Self::Exhausted(err) => Some(err),
      Self::Cancelled(_) => None,
    }
  }
}

/// Backoff schedule configuration.
///
/// The delay before attempt `n` (0-based) is
/// `initial_backoff * multiplier^n`, capped at `max_backoff` when one is set,
/// then jittered by `± base * randomization_factor`. Attempt 0 is never
/// delayed.
#[derive(Clone, Debug)]
pub struct RetryConfig {
  initial_backoff: Duration,
  max_backoff: Duration,
  multiplier: f64,
  randomization_factor: f64,
  max_attempts: usize,
}

impl RetryConfig {
  /// A schedule starting from `initial_backoff`: no cap, multiplier 1, no
  /// jitter, unbounded attempts.
  pub fn new(initial_backoff: Duration) -> Self {
    Self {
      initial_backoff,
      max_backoff: Duration::ZERO,
      multiplier: 1.0,
      randomization_factor: 0.0,
      max_attempts: 0,
    }
  }

  /// Cap the pre-jitter backoff. `Duration::ZERO` (the default) means
  /// uncapped.
  pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
    self.max_backoff = max_backoff;
    self
  }

  /// Geometric growth factor applied per attempt.
  pub fn multiplier(mut self, multiplier: f64) -> Self {
    self.multiplier = multiplier;
    self
  }

  /// Jitter amplitude as a fraction of the computed backoff, clamped to
  /// `[0, 1]`. Zero (the default) makes the schedule exact.
  pub fn randomization_factor(mut self, factor: f64) -> Self {
    self.randomization_factor = factor.clamp(0.0, 1.0);
    self
  }

  /// Total number of attempts allowed. Zero (the default) means unbounded.
  pub fn max_attempts(mut self, max_attempts: usize) -> Self {
    self.max_attempts = max_attempts;
    self
  }
}

/// Driver for one logical retry session.
///
/// [`next`](Self::next) paces the caller's loop: the first call passes
/// through immediately, later calls sleep the configured backoff first and
/// report `false` once attempts are exhausted or the bound context fires.
/// The driver never runs the fallible operation itself and does not know
/// whether an attempt succeeded; stopping on success is the caller's exit
/// from the loop.
pub struct Retrier {
  ctx: Context,
  config: RetryConfig,
  attempt: usize,
  started: bool,
  sampler: Box<dyn FnMut() -> f64 + Send>,
}

impl Retrier {
  /// Bind a driver to `ctx` and `config`, with jitter sampled from the
  /// thread-local generator.
  pub fn start(ctx: &Context, config: RetryConfig) -> Self {
    Self::start_with_sampler(ctx, config, || {
      rand::thread_rng().gen_range(-1.0..=1.0)
    })
  }

  /// [`start`](Self::start) with an injected jitter sampler, expected to
  /// yield values in `[-1, 1]`. Lets tests pin the jitter term.
  pub fn start_with_sampler(
    ctx: &Context,
    config: RetryConfig,
    sampler: impl FnMut() -> f64 + Send + 'static,
  ) -> Self {
    Self {
      ctx: ctx.clone(),
      config,
      attempt: 0,
      started: false,
      sampler: Box::new(sampler),
    }
  }

  /// Advance to the next attempt.
  ///
  /// The first call returns `true` immediately; attempt 0 is never delayed.
  /// Later calls sleep the computed backoff, returning `false` without
  /// completing the sleep if the bound context fires, and `false` without
  /// sleeping at all once `max_attempts` is reached. A `false` return leaves
  /// [`current_attempt`](Self::current_attempt) untouched.
  pub async fn next(&mut self) -> bool {
    if !self.started {
      self.started = true;
      return true;
    }
    let upcoming = self.attempt + 1;
    if self.config.max_attempts > 0 && upcoming >= self.config.max_attempts {
      debug!(attempts = self.config.max_attempts, "retry attempts exhausted");
      return false;
    }
    let delay = self.delay_for(upcoming);
    trace!(attempt = upcoming, ?delay, "backing off before next attempt");
    let ctx = self.ctx.clone();
    tokio::select! {
      biased;
      _ = ctx.done() => false,
      _ = sleep(delay) => {
        self.attempt = upcoming;
        true
      }
    }
  }

  /// 0-based index of the most recently started attempt.
  pub fn current_attempt(&self) -> usize { self.attempt }

  /// The delay the upcoming [`next`](Self::next) call would sleep. Jitter is
  /// sampled per call, so with a non-zero randomization factor consecutive
  /// hints differ.
  pub fn next_backoff(&mut self) -> Duration {
    let upcoming = if self.started { self.attempt + 1 } else { 0 };
    self.delay_for(upcoming)
  }

  /// Return to the pristine attempt-0 state, as if newly started. The bound
  /// context is untouched.
  pub fn reset(&mut self) {
    self.attempt = 0;
    self.started = false;
  }

  fn delay_for(&mut self, attempt: usize) -> Duration {
    if attempt == 0 {
      return Duration::ZERO;
    }
    let mut base = self.config.initial_backoff.as_secs_f64()
      * self.config.multiplier.powi(attempt as i32);
    if self.config.max_backoff > Duration::ZERO {
      base = base.min(self.config.max_backoff.as_secs_f64());
    }
    let delay = if self.config.randomization_factor > 0.0 {
      base + base * self.config.randomization_factor * (self.sampler)()
    } else {
      base
    };
    // an uncapped schedule can outgrow f64/Duration range; saturate
    Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(Duration::MAX)
  }
}

/// Run `action` until it succeeds, attempts run out, or `ctx` fires.
///
/// An already-fired context means `action` is never invoked. On exhaustion
/// the most recent action error comes back in
/// [`RetryError::Exhausted`]; a loop stopped by its context reports
/// [`RetryError::Cancelled`] with the context's reason, even if attempts
/// were also exhausted.
///
/// ```rust
/// use std::{io, time::Duration};
/// use steady::prelude::*;
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let ctx = Context::new();
/// let config = RetryConfig::new(Duration::from_millis(1)).max_attempts(5);
///
/// let mut calls = 0;
/// let result = retry(&ctx, config, || {
///   calls += 1;
///   let n = calls;
///   async move {
///     if n >= 3 {
///       Ok(n)
///     } else {
///       Err(io::Error::new(io::ErrorKind::ConnectionReset, "transient"))
///     }
///   }
/// })
/// .await;
///
/// assert_eq!(result.unwrap(), 3);
/// # }
/// ```
pub async fn retry<T, E, F, Fut>(
  ctx: &Context,
  config: RetryConfig,
  mut action: F,
) -> Result<T, RetryError<E>>
where
  E: std::error::Error + 'static,
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let mut driver = Retrier::start(ctx, config);
  let mut last_err: Option<E> = None;
  loop {
    if let Some(reason) = ctx.err() {
      return Err(RetryError::Cancelled(reason));
    }
    if !driver.next().await {
      break;
    }
    match action().await {
      Ok(value) => return Ok(value),
      Err(err) => {
        debug!(attempt = driver.current_attempt(), "retry action failed");
        last_err = Some(err);
      }
    }
  }
  if let Some(reason) = ctx.err() {
    return Err(RetryError::Cancelled(reason));
  }
  let err = last_err.expect("exhaustion is only reachable after a failed attempt");
  Err(RetryError::Exhausted(err))
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use proptest::prelude::*;
  use tokio::time::Instant;

  use super::*;

  #[derive(Debug, Error, PartialEq)]
  #[error("flaky attempt {0}")]
  struct Flaky(usize);

  #[tokio::test(start_paused = true)]
  async fn first_call_is_immediate() {
    let ctx = Context::new();
    let mut driver =
      Retrier::start(&ctx, RetryConfig::new(Duration::from_secs(10)));

    let before = Instant::now();
    assert!(driver.next().await);
    assert_eq!(Instant::now() - before, Duration::ZERO);
    assert_eq!(driver.current_attempt(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn backoff_table_is_exact_without_jitter() {
    let ctx = Context::new();
    let config = RetryConfig::new(Duration::from_millis(100)).multiplier(2.0);
    let mut driver = Retrier::start(&ctx, config);

    assert_eq!(driver.next_backoff(), Duration::ZERO);
    assert!(driver.next().await);

    for (attempt, expected_ms) in [(1, 200), (2, 400), (3, 800)] {
      assert_eq!(driver.next_backoff(), Duration::from_millis(expected_ms));
      let before = Instant::now();
      assert!(driver.next().await);
      assert_eq!(Instant::now() - before, Duration::from_millis(expected_ms));
      assert_eq!(driver.current_attempt(), attempt);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn backoff_is_capped_before_jitter() {
    let ctx = Context::new();
    let config = RetryConfig::new(Duration::from_millis(300))
      .multiplier(3.0)
      .max_backoff(Duration::from_secs(1));
    let mut driver = Retrier::start(&ctx, config);

    assert!(driver.next().await);
    assert_eq!(driver.next_backoff(), Duration::from_millis(900));
    assert!(driver.next().await);
    // 300ms * 3^2 = 2.7s, capped
    assert_eq!(driver.next_backoff(), Duration::from_secs(1));
    assert!(driver.next().await);
    assert_eq!(driver.next_backoff(), Duration::from_secs(1));
  }

  #[tokio::test(start_paused = true)]
  async fn geometric_growth_stays_under_the_cap_across_a_session() {
    let ctx = Context::new();
    let config = RetryConfig::new(Duration::from_micros(10))
      .max_backoff(Duration::from_secs(1))
      .multiplier(2.0)
      .max_attempts(11);
    let mut driver = Retrier::start(&ctx, config);

    let mut attempts = 0;
    while driver.next().await {
      attempts += 1;
      assert!(driver.next_backoff() <= Duration::from_secs(1));
    }
    assert_eq!(attempts, 11);
    assert_eq!(driver.current_attempt(), 10);
  }

  #[tokio::test(start_paused = true)]
  async fn max_attempts_bounds_the_session() {
    let ctx = Context::new();
    let config =
      RetryConfig::new(Duration::from_millis(1)).max_attempts(3);
    let mut driver = Retrier::start(&ctx, config);

    assert!(driver.next().await);
    assert!(driver.next().await);
    assert!(driver.next().await);
    assert!(!driver.next().await);
    // a false return does not move the counter
    assert_eq!(driver.current_attempt(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn reset_restores_the_pristine_state() {
    let ctx = Context::new();
    let config =
      RetryConfig::new(Duration::from_millis(1)).max_attempts(2);
    let mut driver = Retrier::start(&ctx, config);

    assert!(driver.next().await);
    assert!(driver.next().await);
    assert!(!driver.next().await);

    driver.reset();
    assert_eq!(driver.current_attempt(), 0);
    assert_eq!(driver.next_backoff(), Duration::ZERO);
    assert!(driver.next().await);
    assert!(driver.next().await);
    assert!(!driver.next().await);
  }

  #[tokio::test(start_paused = true)]
  async fn cancellation_interrupts_the_backoff_sleep() {
    let ctx = Context::with_timeout(Duration::from_millis(5));
    let config = RetryConfig::new(Duration::from_secs(3600));
    let mut driver = Retrier::start(&ctx, config);

    assert!(driver.next().await);
    let before = Instant::now();
    assert!(!driver.next().await);
    assert!(Instant::now() - before < Duration::from_secs(1));
    assert_eq!(driver.current_attempt(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn injected_sampler_pins_the_jitter() {
    let ctx = Context::new();
    let config = RetryConfig::new(Duration::from_millis(100))
      .randomization_factor(0.5);

    let mut high =
      Retrier::start_with_sampler(&ctx, config.clone(), || 1.0);
    assert!(high.next().await);
    assert_eq!(high.next_backoff(), Duration::from_millis(150));

    let mut low = Retrier::start_with_sampler(&ctx, config, || -1.0);
    assert!(low.next().await);
    assert_eq!(low.next_backoff(), Duration::from_millis(50));
  }

  #[tokio::test(start_paused = true)]
  async fn full_negative_jitter_clamps_at_zero() {
    let ctx = Context::new();
    let config = RetryConfig::new(Duration::from_millis(100))
      .randomization_factor(1.0);
    let mut driver = Retrier::start_with_sampler(&ctx, config, || -1.0);

    assert!(driver.next().await);
    assert_eq!(driver.next_backoff(), Duration::ZERO);
  }

  proptest! {
    #[test]
    fn jitter_stays_within_the_band(
      sample in -1.0f64..=1.0,
      factor in 0.0f64..=1.0,
      attempt in 1usize..6,
    ) {
      let ctx = Context::new();
      let config = RetryConfig::new(Duration::from_millis(80))
        .multiplier(2.0)
        .randomization_factor(factor);
      let mut driver =
        Retrier::start_with_sampler(&ctx, config, move || sample);

      let base = 0.080 * 2.0f64.powi(attempt as i32);
      let delay = driver.delay_for(attempt).as_secs_f64();
      prop_assert!(delay >= base * (1.0 - factor) - 1e-9);
      prop_assert!(delay <= base * (1.0 + factor) + 1e-9);
    }
  }

  #[tokio::test]
  async fn retry_returns_the_first_success() {
    let ctx = Context::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let result: Result<&str, RetryError<Flaky>> =
      retry(&ctx, RetryConfig::new(Duration::from_millis(1)), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok("up") }
      })
      .await;

    assert_eq!(result.unwrap(), "up");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn retry_recovers_after_transient_failures() {
    let ctx = Context::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let config =
      RetryConfig::new(Duration::from_millis(10)).max_attempts(5);
    let result = retry(&ctx, config, move || {
      let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
      async move { if n < 3 { Err(Flaky(n)) } else { Ok(n) } }
    })
    .await;

    assert_eq!(result.unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn retry_exhaustion_surfaces_the_last_error() {
    let ctx = Context::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let config =
      RetryConfig::new(Duration::from_millis(10)).max_attempts(3);
    let result: Result<(), _> = retry(&ctx, config, move || {
      let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
      async move { Err(Flaky(n)) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match result {
      Err(RetryError::Exhausted(err)) => assert_eq!(err, Flaky(3)),
      other => panic!("expected exhaustion, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn retry_never_runs_the_action_under_a_fired_context() {
    let ctx = Context::new();
    ctx.cancel();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let result: Result<(), RetryError<Flaky>> =
      retry(&ctx, RetryConfig::new(Duration::from_millis(1)), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
      })
      .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
      result,
      Err(RetryError::Cancelled(ContextError::Cancelled))
    ));
  }

  #[tokio::test(start_paused = true)]
  async fn retry_reports_cancellation_over_exhaustion() {
    let ctx = Context::with_timeout(Duration::from_millis(5));
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let config = RetryConfig::new(Duration::from_secs(3600));
    let result: Result<(), _> = retry(&ctx, config, move || {
      let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
      async move { Err(Flaky(n)) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(
      result,
      Err(RetryError::Cancelled(ContextError::DeadlineExceeded))
    ));
  }

  #[test]
  fn into_inner_extracts_the_action_error() {
    let exhausted: RetryError<Flaky> = RetryError::Exhausted(Flaky(4));
    assert_eq!(exhausted.into_inner(), Some(Flaky(4)));

    let cancelled: RetryError<Flaky> =
      RetryError::Cancelled(ContextError::Cancelled);
    assert_eq!(cancelled.into_inner(), None);
  }
}
