//! Retry for transient SQLite lock contention
//!
//! Audit and ledger writes happen from several concurrent Tier 3 batches
//! against one SQLite file. A `database is locked` error is retried with
//! exponential backoff (10 ms doubling, capped at 1 s) until `max_wait_ms`
//! has elapsed; every other error returns immediately.

use std::future::Future;
use std::time::{Duration, Instant};
use tcv_common::{Error, Result};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let max_wait = Duration::from_millis(max_wait_ms);
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Database write succeeded after lock retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_lock_contention() {
            return Err(err);
        }

        let elapsed = start.elapsed();
        if elapsed >= max_wait {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                max_wait_ms,
                "Database still locked, giving up"
            );
            return Err(Error::Internal(format!(
                "{}: database locked after {} attempts ({} ms)",
                operation_name,
                attempt,
                elapsed.as_millis()
            )));
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            "Database locked, retrying"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}
