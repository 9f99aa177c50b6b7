//! Example: Sharing one connection attempt between many callers
//!
//! This example demonstrates:
//! 1. Concurrent requests coalescing onto a single retry cycle
//! 2. Randomized exponential backoff configured from TOML
//! 3. Ending the controller while a backoff wait is armed
//!
//! Run with:
//! ```bash
//! RUST_LOG=singleflight_retry=debug cargo run -p singleflight-retry --example flaky_service
//! ```

use singleflight_retry::prelude::*;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// A simulated service that refuses the first few connections
struct FlakyService {
    attempts: AtomicU32,
    fail_count: u32,
}

impl FlakyService {
    fn new(fail_count: u32) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU32::new(0),
            fail_count,
        })
    }

    async fn connect(&self) -> std::result::Result<String, std::io::Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;

        if attempt <= self.fail_count {
            println!("  Attempt {}: connection refused", attempt);
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused on attempt {}", attempt),
            ))
        } else {
            println!("  Attempt {}: connected", attempt);
            Ok(format!("session-{}", attempt))
        }
    }

    fn total_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

fn controller_for(
    service: &Arc<FlakyService>,
    config: RetryConfig,
) -> std::result::Result<RetryController<String, bool>, RetryError> {
    let service = Arc::clone(service);
    RetryController::builder()
        .name("flaky-service")
        .attempt(move || {
            let service = Arc::clone(&service);
            async move { service.connect().await }
        })
        .on_success(|session: &String| {
            println!("  on_success: {}", session);
            None
        })
        .on_end(|last: Option<String>| async move {
            match &last {
                Some(session) => println!("  on_end: closing {}", session),
                None => println!("  on_end: nothing to close"),
            }
            last.is_some()
        })
        .config(config)
        .log(|message: &str| println!("  [log] {}", message))
        .build()
}

/// Example 1: Many callers, one cycle
async fn example_coalescing() -> std::result::Result<(), Box<dyn Error>> {
    println!("\n=== Example 1: Concurrent Callers Share One Cycle ===\n");

    let config: RetryConfig = toml::from_str(
        r#"
        retry_min = 100
        retry_base = 2.0
        retry_exponent = 3
        "#,
    )?;
    let service = FlakyService::new(2);
    let controller = controller_for(&service, config)?;

    let start = Instant::now();
    let callers: Vec<_> = (0..5).map(|_| tokio::spawn(controller.request())).collect();

    for (index, caller) in callers.into_iter().enumerate() {
        println!("Caller {} got {}", index + 1, caller.await??);
    }

    println!("\nTotal attempts: {}", service.total_attempts());
    println!("Total time: {:?}", start.elapsed());
    println!("Cleaned up: {}", controller.end().await);

    Ok(())
}

/// Example 2: Ending while a retry is scheduled
async fn example_end_during_backoff() -> std::result::Result<(), Box<dyn Error>> {
    println!("\n=== Example 2: End During Backoff ===\n");

    let config = RetryConfig {
        retry_min: 60_000,
        ..RetryConfig::default()
    };
    let service = FlakyService::new(u32::MAX);
    let controller = controller_for(&service, config)?;

    let request = tokio::spawn(controller.request());
    while !controller.is_waiting() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    println!("Retry armed, ending controller...");
    println!("Cleaned up: {}", controller.end().await);

    match request.await? {
        Ok(session) => println!("Unexpected session: {}", session),
        Err(err) => println!("Request failed: {}", err),
    }
    println!("Total attempts: {}", service.total_attempts());

    Ok(())
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    example_coalescing().await?;
    example_end_during_backoff().await?;

    Ok(())
}
