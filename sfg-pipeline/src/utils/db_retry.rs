//! Lock-contention retry for catalog writes
//!
//! Catalog writes happen on the orchestrator task only, but a `status` query or
//! an ingestion in another process can hold the SQLite file for a moment.

use sfg_common::{Error, Result};
use std::time::{Duration, Instant};

/// Total time a catalog write may spend waiting on a locked database
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const FIRST_PAUSE_MS: u64 = 10;
const LONGEST_PAUSE_MS: u64 = 1000;

/// Run `operation`, re-running it while SQLite reports lock contention
///
/// Pauses start at 10 ms and double up to 1 s. Once `max_wait_ms` has passed
/// the lock error becomes `Error::Internal`. Any other error returns at once.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut pause_ms = FIRST_PAUSE_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Catalog write went through after waiting on a lock"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_lock_contention() {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Gave up waiting for the catalog lock"
                    );
                    return Err(Error::Internal(format!(
                        "{} still locked after {} attempts ({} of {} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    pause_ms,
                    "Catalog locked; pausing before the next attempt"
                );

                tokio::time::sleep(Duration::from_millis(pause_ms)).await;
                pause_ms = (pause_ms * 2).min(LONGEST_PAUSE_MS);
            }
        }
    }
}
