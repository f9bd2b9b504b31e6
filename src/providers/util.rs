use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Runs an async operation again after transient failures.
///
/// `retries` is the number of retry attempts on top of the initial run;
/// `delay_ms` is the pause between attempts. Returns the first success or
/// the error from the final attempt.
pub async fn with_retry<F, Fut, T, E>(mut operation: F, retries: usize, delay_ms: u64) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                let err = err.into();
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
                attempt += 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
