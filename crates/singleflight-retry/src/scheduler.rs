//! Clock and tick primitives used by the attempt loop.
//!
//! The controller never touches `tokio::time` directly; it goes through a
//! [`Scheduler`] so tests and embedders can substitute their own notion of time.

use async_trait::async_trait;
use std::time::Duration;

/// Timer and tick source for a [`RetryController`](crate::RetryController).
///
/// # Examples
///
/// A scheduler that skips backoff waits entirely:
///
/// ```rust
/// use singleflight_retry::scheduler::Scheduler;
/// use async_trait::async_trait;
/// use std::time::Duration;
///
/// struct Immediate;
///
/// #[async_trait]
/// impl Scheduler for Immediate {
///     async fn sleep(&self, _delay: Duration) {}
///
///     async fn next_tick(&self) {
///         tokio::task::yield_now().await;
///     }
/// }
/// ```
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// Complete after `delay` has elapsed.
    ///
    /// Dropping the returned future must cancel the underlying timer.
    async fn sleep(&self, delay: Duration);

    /// Give other tasks a chance to run before continuing.
    async fn next_tick(&self);
}

/// Scheduler backed by the tokio timer wheel.
///
/// Works with a paused test clock (`#[tokio::test(start_paused = true)]`), in
/// which case waits complete as soon as the runtime is otherwise idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    async fn next_tick(&self) {
        tokio::task::yield_now().await;
    }
}
