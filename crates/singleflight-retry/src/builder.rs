//! Builder for [`RetryController`].

use crate::backoff::RetryDelay;
use crate::config::RetryConfig;
use crate::controller::{AttemptFn, EndFn, Inner, LogSink, RetryController, SetupFn, SuccessFn};
use crate::error::{BoxError, Result, RetryError};
use crate::scheduler::{Scheduler, TokioScheduler};
use futures::future::{FutureExt, TryFutureExt};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OnceCell, watch};

/// Builder for configuring a [`RetryController`].
///
/// `attempt`, `on_success` and `on_end` are required; everything else has a
/// default:
///
/// | setting          | default |
/// |------------------|---------|
/// | `name`           | `"unknown"` |
/// | `setup`          | no-op |
/// | `retry_min`      | 0ms |
/// | `retry_base`     | 1.2 |
/// | `retry_exponent` | 33 |
/// | `retry_limit`    | unbounded |
/// | `retry_delay`    | [`ExponentialBackoff`](crate::backoff::ExponentialBackoff) from the three settings above |
/// | `log`            | none (events still go to `tracing`) |
/// | `scheduler`      | [`TokioScheduler`] |
pub struct RetryControllerBuilder<T, R> {
    name: Option<String>,
    setup: Option<SetupFn>,
    attempt: Option<AttemptFn<T>>,
    on_success: Option<SuccessFn<T>>,
    on_end: Option<EndFn<T, R>>,
    config: RetryConfig,
    retry_delay: Option<Box<dyn RetryDelay>>,
    log: Option<LogSink>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<T, R> Default for RetryControllerBuilder<T, R> {
    fn default() -> Self {
        Self {
            name: None,
            setup: None,
            attempt: None,
            on_success: None,
            on_end: None,
            config: RetryConfig::default(),
            retry_delay: None,
            log: None,
            scheduler: None,
        }
    }
}

impl<T, R> RetryControllerBuilder<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Set the label used in logs and error messages.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set a step that runs once at the start of every request cycle.
    ///
    /// A failing setup ends the cycle with [`RetryError::Setup`]; it is not
    /// retried.
    pub fn setup<F, Fut, E>(mut self, setup: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.setup = Some(Box::new(move || setup().err_into::<BoxError>().boxed()));
        self
    }

    /// Set the operation to retry (required).
    pub fn attempt<F, Fut, E>(mut self, attempt: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        self.attempt = Some(Box::new(move || attempt().err_into::<BoxError>().boxed()));
        self
    }

    /// Set the transform applied to a successful result (required).
    ///
    /// Returning `Some` replaces the result handed to callers; `None` keeps it.
    pub fn on_success<F>(mut self, on_success: F) -> Self
    where
        F: Fn(&T) -> Option<T> + Send + Sync + 'static,
    {
        self.on_success = Some(Box::new(on_success));
        self
    }

    /// Set the teardown step run by [`RetryController::end`] (required).
    ///
    /// It receives the last successful result, if there is one.
    pub fn on_end<F, Fut>(mut self, on_end: F) -> Self
    where
        F: Fn(Option<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        self.on_end = Some(Box::new(move |last: Option<T>| on_end(last).boxed()));
        self
    }

    /// Set the minimum wait of the default backoff.
    pub fn retry_min(mut self, min: Duration) -> Self {
        self.config.retry_min = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the growth factor of the default backoff.
    pub fn retry_base(mut self, base: f64) -> Self {
        self.config.retry_base = base;
        self
    }

    /// Set the failure count after which the default backoff stops growing.
    pub fn retry_exponent(mut self, exponent: u32) -> Self {
        self.config.retry_exponent = exponent;
        self
    }

    /// Give up once more than `limit` failures have been recorded.
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.config.retry_limit = Some(limit);
        self
    }

    /// Apply numeric backoff settings, e.g. loaded from a config file.
    pub fn config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default backoff with a custom delay policy.
    pub fn retry_delay<D>(mut self, policy: D) -> Self
    where
        D: RetryDelay + 'static,
    {
        self.retry_delay = Some(Box::new(policy));
        self
    }

    /// Forward diagnostic messages to `log` in addition to `tracing`.
    pub fn log<F>(mut self, log: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.log = Some(Arc::new(log));
        self
    }

    /// Use a custom timer and tick source.
    pub fn scheduler<S: Scheduler>(mut self, scheduler: S) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// [`RetryError::Configuration`] if `attempt`, `on_success` or `on_end`
    /// was not provided.
    pub fn build(self) -> Result<RetryController<T, R>> {
        let missing: Vec<&str> = [
            ("attempt", self.attempt.is_none()),
            ("on_success", self.on_success.is_none()),
            ("on_end", self.on_end.is_none()),
        ]
        .into_iter()
        .filter_map(|(field, absent)| absent.then_some(field))
        .collect();

        let (Some(attempt), Some(on_success), Some(on_end)) =
            (self.attempt, self.on_success, self.on_end)
        else {
            return Err(RetryError::Configuration(format!(
                "a retry controller needs an attempt, on_success and on_end function (missing: {})",
                missing.join(", ")
            )));
        };

        let config = self.config;
        let retry_delay = self
            .retry_delay
            .unwrap_or_else(|| Box::new(config.backoff()));

        Ok(RetryController::from_inner(Inner {
            name: self.name.unwrap_or_else(|| "unknown".to_string()),
            setup: self.setup,
            attempt,
            on_success,
            on_end,
            retry_limit: config.retry_limit,
            retry_delay,
            log: self.log,
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Arc::new(TokioScheduler)),
            state: Mutex::new(Default::default()),
            ended: OnceCell::new(),
            shutdown: watch::channel(false).0,
        }))
    }
}
