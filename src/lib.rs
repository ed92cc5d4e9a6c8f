//! # steady: reactive value cells and backoff retries
//!
//! Two small, composable concurrency primitives: a thread-safe observable
//! value cell and a jittered exponential-backoff retry driver, tied together
//! by a shared cancellation [`Context`].
//!
//! ## Quick Start
//!
//! ```rust
//! use steady::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let cell = ReadyCell::new();
//! cell.subscribe(|v| println!("value: {v}"));
//!
//! cell.update(1);
//! let latest = cell.wait(&Context::new()).await.unwrap();
//! assert_eq!(latest, 1);
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ReactiveCell`] | Thread-safe single-slot store with synchronous observer fan-out |
//! | [`ReadyCell`] | A cell plus a one-shot "first value has landed" gate |
//! | [`Retrier`] / [`retry`] | Attempt-bounded exponential backoff with jitter |
//! | [`Context`] | Cancellation scope with an optional deadline |
//!
//! Producers push values in with [`ReactiveCell::update`] — or let the
//! [`source`] adapters drain a channel, stream, or polling function into a
//! cell. Consumers subscribe for pushes or read [`ReactiveCell::current`] on
//! demand. A [`Retrier`] paces any fallible operation independently,
//! including the fetch that feeds a cell.
//!
//! [`ReactiveCell`]: cell::ReactiveCell
//! [`ReactiveCell::update`]: cell::ReactiveCell::update
//! [`ReactiveCell::current`]: cell::ReactiveCell::current
//! [`ReadyCell`]: ready::ReadyCell
//! [`Retrier`]: retry::Retrier
//! [`retry`]: retry::retry
//! [`Context`]: context::Context

pub mod cell;
pub mod context;
pub mod prelude;
pub mod ready;
pub mod retry;
pub mod source;

pub use prelude::*;
