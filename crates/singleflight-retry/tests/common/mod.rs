//! Common test utilities
//!
//! [`Probe`] stands in for every collaborator of a controller: it plays a
//! scripted sequence of attempt outcomes and delay decisions, and records each
//! call so tests can assert on them.

#![allow(dead_code)]

use rstest::*;
use singleflight_retry::{RetryController, RetryControllerBuilder};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Outcome of one scripted attempt.
pub type Outcome = Result<&'static str, &'static str>;

/// Scripted collaborators plus call recorders.
pub struct Probe {
    outcomes: Mutex<VecDeque<Outcome>>,
    delays: Mutex<VecDeque<Option<Duration>>>,
    latency: Mutex<Duration>,
    attempts: AtomicU32,
    setups: AtomicU32,
    delay_calls: Mutex<Vec<u32>>,
    successes: Mutex<Vec<String>>,
    ends: Mutex<Vec<Option<String>>>,
    logs: Mutex<Vec<String>>,
}

/// Fixture: a probe whose attempts always succeed with `"abc123"`.
#[fixture]
pub fn probe() -> Arc<Probe> {
    Probe::new(vec![Ok("abc123")])
}

impl Probe {
    /// Play `outcomes` in order; the last one repeats forever.
    pub fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            delays: Mutex::new(VecDeque::from([Some(Duration::from_millis(1))])),
            latency: Mutex::new(Duration::ZERO),
            attempts: AtomicU32::new(0),
            setups: AtomicU32::new(0),
            delay_calls: Mutex::new(Vec::new()),
            successes: Mutex::new(Vec::new()),
            ends: Mutex::new(Vec::new()),
            logs: Mutex::new(Vec::new()),
        })
    }

    /// Answer delay requests in order; the last answer repeats forever.
    pub fn plan_delays(&self, delays: Vec<Option<Duration>>) {
        *self.delays.lock().unwrap() = delays.into();
    }

    /// Make every attempt take `latency` on the tokio clock before settling.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Builder wired to this probe, named `"test"`.
    pub fn builder(self: &Arc<Self>) -> RetryControllerBuilder<String, Option<String>> {
        let attempt_probe = Arc::clone(self);
        let setup_probe = Arc::clone(self);
        let success_probe = Arc::clone(self);
        let end_probe = Arc::clone(self);
        let delay_probe = Arc::clone(self);
        let log_probe = Arc::clone(self);

        RetryController::builder()
            .name("test")
            .setup(move || {
                setup_probe.setups.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, std::io::Error>(()) }
            })
            .attempt(move || {
                let probe = Arc::clone(&attempt_probe);
                async move { probe.attempt().await }
            })
            .on_success(move |value: &String| {
                success_probe.successes.lock().unwrap().push(value.clone());
                None
            })
            .on_end(move |last: Option<String>| {
                end_probe.ends.lock().unwrap().push(last.clone());
                async move { last }
            })
            .retry_delay(move |failures: u32| delay_probe.next_delay(failures))
            .log(move |message: &str| log_probe.logs.lock().unwrap().push(message.to_string()))
    }

    /// Controller built from [`Probe::builder`] with no further changes.
    pub fn controller(self: &Arc<Self>) -> RetryController<String, Option<String>> {
        self.builder().build().expect("probe builder is complete")
    }

    pub async fn attempt(&self) -> Result<String, std::io::Error> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match next_of(&self.outcomes) {
            Some(Ok(value)) => Ok(value.to_string()),
            Some(Err(message)) => Err(std::io::Error::other(message)),
            None => Err(std::io::Error::other("no scripted outcome")),
        }
    }

    fn next_delay(&self, failures: u32) -> Option<Duration> {
        self.delay_calls.lock().unwrap().push(failures);
        next_of(&self.delays).flatten()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn setups(&self) -> u32 {
        self.setups.load(Ordering::SeqCst)
    }

    /// Failure counts the delay policy was asked about, in order.
    pub fn delay_calls(&self) -> Vec<u32> {
        self.delay_calls.lock().unwrap().clone()
    }

    pub fn successes(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    pub fn ends(&self) -> Vec<Option<String>> {
        self.ends.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }
}

fn next_of<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Yield to spawned tasks until `condition` holds.
///
/// Yielding does not advance a paused clock, so armed waits stay armed.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}
