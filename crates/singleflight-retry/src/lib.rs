#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Single-flight retry controller.
//!
//! This crate wraps a fallible asynchronous operation so that:
//!
//! - **Concurrent callers share one attempt** - every `request()` made while a
//!   cycle is in flight observes the same outcome
//! - **Failures are retried with randomized exponential backoff** until success,
//!   an abort from the delay policy, or an explicit retry limit
//! - **Shutdown is clean** - `end()` cancels a pending backoff wait, lets an
//!   in-flight attempt finish, and runs the teardown step exactly once
//!
//! # Examples
//!
//! ```rust
//! use singleflight_retry::prelude::*;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let calls = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&calls);
//!
//! let controller = RetryController::builder()
//!     .name("flaky")
//!     .attempt(move || {
//!         let counter = Arc::clone(&counter);
//!         async move {
//!             if counter.fetch_add(1, Ordering::SeqCst) < 2 {
//!                 Err(std::io::Error::other("not yet"))
//!             } else {
//!                 Ok(42u32)
//!             }
//!         }
//!     })
//!     .on_success(|_: &u32| None)
//!     .on_end(|last: Option<u32>| async move { last })
//!     .retry_delay(FixedDelay::new(Duration::from_millis(1)))
//!     .build()?;
//!
//! assert_eq!(controller.request().await?, 42);
//! assert_eq!(calls.load(Ordering::SeqCst), 3);
//! assert_eq!(controller.end().await, Some(42));
//! # Ok(())
//! # }
//! ```

pub mod backoff;
mod builder;
pub mod config;
mod controller;
pub mod error;
pub mod scheduler;

pub use builder::RetryControllerBuilder;
pub use config::RetryConfig;
pub use controller::{LogSink, RetryController};
pub use error::{BoxError, Result, RetryError};

/// Convenient re-exports of commonly used items.
///
/// ```rust
/// use singleflight_retry::prelude::*;
/// ```
pub mod prelude {
    pub use crate::backoff::{ExponentialBackoff, FixedDelay, RetryDelay};
    pub use crate::config::RetryConfig;
    pub use crate::error::{Result, RetryError};
    pub use crate::scheduler::{Scheduler, TokioScheduler};
    pub use crate::{RetryController, RetryControllerBuilder};
}
