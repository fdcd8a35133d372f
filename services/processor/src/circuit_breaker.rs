use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Stops a periodic job from hammering an unavailable store
///
/// Only failures the caller classifies as transient count towards opening
/// the circuit; a job that keeps failing on bad data should not stop the
/// whole sweep.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_count: Arc<AtomicU64>,
    last_failure_time: Arc<RwLock<Option<Instant>>>,
    state: Arc<RwLock<CircuitState>>,
    failure_threshold: u64,
    reset_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u64, reset_timeout: Duration) -> Self {
        Self {
            name,
            failure_count: Arc::new(AtomicU64::new(0)),
            last_failure_time: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(CircuitState::Closed)),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
        }
    }

    pub async fn call<F, Fut, T, E>(
        &self,
        is_transient: impl Fn(&E) -> bool,
        operation: F,
    ) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow().await {
            metrics::counter!("circuit_breaker_rejections_total", "breaker" => self.name).increment(1);
            return Err(CircuitBreakerError::Open);
        }

        match operation().await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(error) => {
                if is_transient(&error) {
                    self.on_failure().await;
                }
                Err(CircuitBreakerError::OperationFailed(error))
            }
        }
    }

    async fn allow(&self) -> bool {
        let state = *self.state.read().await;
        if state != CircuitState::Open {
            return true;
        }

        let last_failure = *self.last_failure_time.read().await;
        match last_failure {
            Some(last_time) if last_time.elapsed() > self.reset_timeout => {
                let mut state = self.state.write().await;
                *state = CircuitState::HalfOpen;
                tracing::info!(breaker = self.name, "Circuit breaker transitioning to HalfOpen");
                true
            }
            _ => false,
        }
    }

    async fn on_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!(breaker = self.name, "Circuit breaker closed after successful operation");
        }
    }

    async fn on_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut last_failure = self.last_failure_time.write().await;
        *last_failure = Some(Instant::now());

        let mut state = self.state.write().await;
        // A failed trial call reopens immediately
        if failures >= self.failure_threshold || *state == CircuitState::HalfOpen {
            if *state != CircuitState::Open {
                tracing::warn!(breaker = self.name, failures, "Circuit breaker opened");
            }
            *state = CircuitState::Open;
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub async fn is_open(&self) -> bool {
        self.state().await == CircuitState::Open
    }
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    Open,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::Open => write!(f, "Circuit breaker is open"),
            CircuitBreakerError::OperationFailed(e) => write!(f, "Operation failed: {}", e),
        }
    }
}

impl<E: std::error::Error> std::error::Error for CircuitBreakerError<E> {}
