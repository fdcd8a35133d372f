use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;

/// Backoff for reaching Postgres and Redis at startup
///
/// Operation retries are owned by the durable queue; this only covers the
/// window where the process comes up before its dependencies do.
pub struct RetryStrategy {
    max_elapsed: Duration,
}

impl RetryStrategy {
    pub fn new(max_elapsed: Duration) -> Self {
        Self { max_elapsed }
    }

    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(30))
            .with_multiplier(2.0)
            .with_max_elapsed_time(Some(self.max_elapsed))
            .build()
    }

    /// Retries `connect` until it succeeds or the elapsed budget runs out
    pub async fn connect<T, E, F, Fut>(&self, target: &'static str, mut connect: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        backoff::future::retry_notify(
            self.create_backoff(),
            || {
                let attempt = connect();
                async move { attempt.await.map_err(backoff::Error::transient) }
            },
            |error: E, wait: Duration| {
                tracing::warn!(
                    target_service = target,
                    error = %error,
                    retry_in_ms = wait.as_millis() as u64,
                    "Connection failed, retrying"
                );
            },
        )
        .await
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_backoff_bounds() {
        let backoff = RetryStrategy::default().create_backoff();
        assert_eq!(backoff.initial_interval, Duration::from_secs(1));
        assert_eq!(backoff.max_interval, Duration::from_secs(30));
        assert_eq!(backoff.max_elapsed_time, Some(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_connect_retries_until_success() {
        let strategy = RetryStrategy::new(Duration::from_secs(10));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<u32, String> = strategy
            .connect("test", || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 2 {
                        Err("connection refused".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
