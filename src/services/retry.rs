use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::sleep;
use tracing::warn;

use crate::dao::storage::StorageResult;

const INITIAL_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(4);

/// Bounded exponential backoff for store writes failing with a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    initial: Duration,
    cap: Duration,
}

impl RetryPolicy {
    /// Policy making `attempts` tries in total (at least one).
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            initial: INITIAL_DELAY,
            cap: MAX_DELAY,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the attempts are exhausted.
    pub async fn run<T, F>(&self, what: &str, mut op: F) -> StorageResult<T>
    where
        F: FnMut() -> BoxFuture<'static, StorageResult<T>>,
    {
        let mut delay = self.initial;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    warn!(what, attempt, retry_in = ?delay, error = %err, "store write failed; retrying");
                    sleep(delay).await;
                    delay = (delay * 2).min(self.cap);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use crate::dao::storage::StorageError;

    fn unavailable() -> StorageError {
        StorageError::unavailable("down".into(), std::io::Error::other("refused"))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_with_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = RetryPolicy::new(3)
            .run("set status", move || {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if call < 2 { Err(unavailable()) } else { Ok(call) }
                })
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 250 ms then 500 ms of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_last_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: StorageResult<()> = RetryPolicy::new(2)
            .run("push round", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Err(unavailable()) })
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn write_conflicts_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: StorageResult<()> = RetryPolicy::new(5)
            .run("set turn", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {
                    Err(StorageError::WriteConflict {
                        path: "gameSessions/s1/turn".into(),
                    })
                })
            })
            .await;

        assert!(matches!(result, Err(StorageError::WriteConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
