//! The single-flight retry controller.
//!
//! A [`RetryController`] owns one fallible asynchronous operation. Callers ask
//! for its result with [`request`](RetryController::request); concurrent callers
//! share one request cycle, and the cycle keeps retrying failed attempts with
//! backoff until the operation succeeds, the delay policy gives up, the retry
//! limit is hit, or the controller is shut down with
//! [`end`](RetryController::end).
//!
//! # Cycle states
//!
//! ```text
//! IDLE ─▶ ATTEMPTING ─▶ SUCCESS
//!              │
//!              ▼
//!           FAILED ─▶ WAITING ─▶ ATTEMPTING ─▶ ...
//!              │          │
//!              ▼          ▼
//!      LIMIT / STOPPED   ABORTED / ENDED / STOPPED
//! ```

use crate::backoff::RetryDelay;
use crate::builder::RetryControllerBuilder;
use crate::error::{BoxError, Failure, Result, RetryError};
use crate::scheduler::Scheduler;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{OnceCell, watch};
use tracing::{debug, info, warn};

pub(crate) type SetupFn =
    Box<dyn Fn() -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;
pub(crate) type AttemptFn<T> =
    Box<dyn Fn() -> BoxFuture<'static, std::result::Result<T, BoxError>> + Send + Sync>;
pub(crate) type SuccessFn<T> = Box<dyn Fn(&T) -> Option<T> + Send + Sync>;
pub(crate) type EndFn<T, R> = Box<dyn Fn(Option<T>) -> BoxFuture<'static, R> + Send + Sync>;

/// Sink receiving human-readable diagnostics from a controller.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

type SharedCycle<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Coalescing retry wrapper around one asynchronous operation.
///
/// Cloning the controller yields another handle to the same state.
///
/// # Examples
///
/// ```rust
/// use singleflight_retry::RetryController;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), singleflight_retry::RetryError> {
/// let controller = RetryController::builder()
///     .name("config-service")
///     .attempt(|| async { Ok::<_, std::io::Error>("connected".to_string()) })
///     .on_success(|_conn: &String| None)
///     .on_end(|last: Option<String>| async move { last.is_some() })
///     .retry_delay(|_failures: u32| Some(Duration::from_millis(10)))
///     .build()?;
///
/// // Both callers share one attempt
/// let (a, b) = tokio::join!(controller.request(), controller.request());
/// assert_eq!(a?, "connected");
/// assert_eq!(b?, "connected");
///
/// assert!(controller.end().await);
/// # Ok(())
/// # }
/// ```
pub struct RetryController<T, R> {
    inner: Arc<Inner<T, R>>,
}

pub(crate) struct Inner<T, R> {
    pub(crate) name: String,
    pub(crate) setup: Option<SetupFn>,
    pub(crate) attempt: AttemptFn<T>,
    pub(crate) on_success: SuccessFn<T>,
    pub(crate) on_end: EndFn<T, R>,
    pub(crate) retry_limit: Option<u32>,
    pub(crate) retry_delay: Box<dyn RetryDelay>,
    pub(crate) log: Option<LogSink>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) state: Mutex<State<T>>,
    pub(crate) ended: OnceCell<R>,
    pub(crate) shutdown: watch::Sender<bool>,
}

pub(crate) struct State<T> {
    failures: u32,
    pending: Option<SharedCycle<T>>,
    stopped: bool,
    waiting: Vec<PendingWait>,
    cycles: u64,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            failures: 0,
            pending: None,
            stopped: false,
            waiting: Vec::new(),
            cycles: 0,
        }
    }
}

/// An armed backoff wait of one cycle.
struct PendingWait {
    cycle: u64,
    delay: Duration,
}

impl<T, R> RetryController<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Create a builder for configuring a controller.
    pub fn builder() -> RetryControllerBuilder<T, R> {
        RetryControllerBuilder::default()
    }

    pub(crate) fn from_inner(inner: Inner<T, R>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Get the operation's result, starting a new cycle if none is pending.
    ///
    /// Every call made while a cycle exists observes that same cycle. The
    /// settled result stays cached until [`reset`](Self::reset) or
    /// [`end`](Self::end), so later calls return it without attempting again.
    ///
    /// The cycle runs on its own task; dropping the returned future does not
    /// cancel it.
    ///
    /// # Errors
    ///
    /// - [`RetryError::NoInstance`] if the controller has been ended and nothing
    ///   is pending
    /// - any terminal error of the cycle (`Aborted`, `RetryLimit`, `Stopped`,
    ///   `Ended`, `Setup`)
    pub fn request(&self) -> BoxFuture<'static, Result<T>> {
        self.observe(self.cycle(true))
    }

    /// Get the result of the pending cycle without ever starting a new one.
    ///
    /// Fails with [`RetryError::NoInstance`] when the controller is idle.
    pub fn request_existing(&self) -> BoxFuture<'static, Result<T>> {
        self.observe(self.cycle(false))
    }

    /// Permanently retire the controller and run the teardown step.
    ///
    /// Cancels every armed backoff wait, waits for the pending cycle (if any) to
    /// settle, and calls `on_end` with its successful result, or `None`.
    /// Failures of the pending cycle are not reported here.
    ///
    /// `on_end` runs exactly once; later calls return the same value.
    ///
    /// Like any future, the returned one does nothing until polled: the
    /// controller only counts as stopped once `end()` is first awaited, so a
    /// [`request`](Self::request) issued between creating and awaiting it can
    /// still start a cycle.
    pub async fn end(&self) -> R {
        let inner = &self.inner;
        inner
            .ended
            .get_or_init(|| async {
                let cancelled = {
                    let mut state = inner.lock();
                    state.stopped = true;
                    inner.shutdown.send_replace(true);
                    let cancelled = std::mem::take(&mut state.waiting);
                    if !cancelled.is_empty() {
                        state.pending = None;
                    }
                    cancelled
                };

                for wait in cancelled {
                    debug!(
                        name = %inner.name,
                        cycle = wait.cycle,
                        delay_ms = millis(wait.delay),
                        "Cancelling pending retry"
                    );
                }

                let last = match self.cycle(false) {
                    Ok(cycle) => cycle.await.ok(),
                    Err(_) => None,
                };
                inner.lock().pending = None;

                info!(
                    name = %inner.name,
                    has_result = last.is_some(),
                    "Ending retry controller"
                );
                (inner.on_end)(last).await
            })
            .await
            .clone()
    }

    /// Forget the cached cycle and the failure count.
    ///
    /// The next [`request`](Self::request) starts a fresh cycle. A cycle that
    /// is still running is not cancelled.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.pending = None;
        state.failures = 0;
        debug!(name = %self.inner.name, "Retry controller reset");
    }

    /// Diagnostic label of this controller.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Consecutive failed attempts since the last success or reset.
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Whether [`end`](Self::end) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    /// Whether a cycle (running or settled) is cached.
    pub fn is_pending(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    /// Whether a backoff wait is currently armed.
    pub fn is_waiting(&self) -> bool {
        !self.inner.lock().waiting.is_empty()
    }

    fn cycle(&self, allow_new: bool) -> Result<SharedCycle<T>> {
        let mut state = self.inner.lock();
        if let Some(pending) = &state.pending {
            return Ok(pending.clone());
        }
        if !allow_new || state.stopped {
            return Err(RetryError::NoInstance);
        }

        state.cycles += 1;
        let id = state.cycles;
        debug!(name = %self.inner.name, cycle = id, "Starting retry cycle");

        let inner = Arc::clone(&self.inner);
        let cycle = tokio::spawn(inner.run_cycle(id))
            .map(|joined| joined.unwrap_or_else(|err| Err(RetryError::Interrupted(err.to_string()))))
            .boxed()
            .shared();
        state.pending = Some(cycle.clone());
        Ok(cycle)
    }

    fn observe(&self, cycle: Result<SharedCycle<T>>) -> BoxFuture<'static, Result<T>> {
        match cycle {
            Ok(cycle) => cycle.boxed(),
            Err(err) => futures::future::err(err).boxed(),
        }
    }
}

impl<T, R> Inner<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, message: impl FnOnce() -> String) {
        if let Some(log) = &self.log {
            log(&message());
        }
    }

    async fn run_cycle(self: Arc<Self>, cycle: u64) -> Result<T> {
        if let Some(setup) = &self.setup {
            if let Err(err) = setup().await {
                warn!(name = %self.name, error = %err, "Retry setup failed");
                return Err(RetryError::setup(&self.name, err));
            }
        }

        let value = self.attempt_loop(cycle).await?;

        info!(name = %self.name, cycle, "Successful retry attempt");
        self.emit(|| format!("Successful retry attempt for {}", self.name));
        self.lock().failures = 0;

        Ok((self.on_success)(&value).unwrap_or(value))
    }

    async fn attempt_loop(&self, cycle: u64) -> Result<T> {
        loop {
            let failure = match self.attempt_once(cycle).await {
                Ok(value) => return Ok(value),
                Err(failure) => failure,
            };
            self.maybe_retry(failure)?;
            self.scheduler.next_tick().await;
        }
    }

    async fn attempt_once(&self, cycle: u64) -> std::result::Result<T, Failure> {
        let failures = self.lock().failures;
        if failures == 0 {
            self.scheduler.next_tick().await;
        } else {
            self.wait(cycle, failures).await?;
        }

        if self.lock().stopped {
            return Err(Failure::Terminal(RetryError::stopped(&self.name)));
        }

        (self.attempt)().await.map_err(Failure::Transient)
    }

    async fn wait(&self, cycle: u64, failures: u32) -> std::result::Result<(), Failure> {
        let Some(delay) = self.retry_delay.next_delay(failures) else {
            return Err(Failure::Terminal(RetryError::Aborted { failures }));
        };

        let mut shutdown = self.shutdown.subscribe();
        {
            let mut state = self.lock();
            if state.stopped {
                return Err(Failure::Terminal(RetryError::stopped(&self.name)));
            }
            state.waiting.push(PendingWait { cycle, delay });
        }

        debug!(
            name = %self.name,
            failures,
            delay_ms = millis(delay),
            "Waiting before next attempt"
        );
        self.emit(|| {
            format!(
                "Retry {}: Waiting {} ms to try {} again",
                failures,
                delay.as_millis(),
                self.name
            )
        });

        // Every armed wait, including those of cycles dropped by reset(), listens
        // to the same shutdown signal
        let ended = tokio::select! {
            _ = self.scheduler.sleep(delay) => false,
            fired = shutdown.wait_for(|ended| *ended).map(|fired| fired.is_ok()) => fired,
        };

        let mut state = self.lock();
        state.waiting.retain(|wait| wait.cycle != cycle);
        if ended {
            Err(Failure::Terminal(RetryError::ended(&self.name)))
        } else if state.stopped {
            Err(Failure::Terminal(RetryError::stopped(&self.name)))
        } else {
            Ok(())
        }
    }

    fn maybe_retry(&self, failure: Failure) -> Result<()> {
        warn!(name = %self.name, error = %failure, "Failed retry attempt");
        self.emit(|| format!("Failed retry attempt for {}: {}", self.name, failure));

        let mut state = self.lock();
        match failure {
            Failure::Terminal(err) => return Err(err),
            Failure::Transient(_) if state.stopped => {
                return Err(RetryError::stopped(&self.name));
            }
            Failure::Transient(_) => {}
        }

        state.failures = state.failures.saturating_add(1);
        match self.retry_limit {
            Some(limit) if state.failures > limit => {
                warn!(name = %self.name, limit, "Retry limit reached");
                Err(RetryError::RetryLimit { limit })
            }
            _ => Ok(()),
        }
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

impl<T, R> Clone for RetryController<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, R> fmt::Debug for RetryController<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RetryController")
            .field("name", &self.inner.name)
            .field("failures", &state.failures)
            .field("pending", &state.pending.is_some())
            .field("waiting", &!state.waiting.is_empty())
            .field("stopped", &state.stopped)
            .field("retry_limit", &self.inner.retry_limit)
            .finish()
    }
}
