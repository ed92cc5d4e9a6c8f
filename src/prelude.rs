//! Prelude module for convenient imports
//!
//! This module re-exports commonly used types and traits for easy access.

pub use crate::{
  cell::{CellSubscription, ReactiveCell, Subscription},
  context::{Context, ContextError},
  ready::ReadyCell,
  retry::{retry, Retrier, RetryConfig, RetryError},
  source::{from_receiver, from_stream, poll, PollSubscription},
};
