use crate::errors::{AppError, GenerationFailureKind};
use crate::llm_client::{GenerationOptions, TextGenerator};
use async_trait::async_trait;
use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Circuit breaker guarding the text-generation backend.
pub type GenerationBreaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::Exponential>, ()>;

/// Creates a circuit breaker for text-generation calls to stop hammering a
/// failing backend.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive transient failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast.
/// - **HALF_OPEN**: Testing if service recovered.
pub fn create_generation_circuit_breaker() -> GenerationBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

fn counts_as_failure(err: &AppError) -> bool {
    err.is_transient()
}

/// A [`TextGenerator`] that routes every call through a circuit breaker.
///
/// Only transient failures (timeouts, rate limits, 5xx) count toward
/// opening the circuit; a bad API key is not a backend outage.
pub struct GuardedGenerator {
    inner: Arc<dyn TextGenerator>,
    breaker: GenerationBreaker,
}

impl GuardedGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, breaker: GenerationBreaker) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl TextGenerator for GuardedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: &str,
        options: &GenerationOptions,
    ) -> Result<String, AppError> {
        use failsafe::futures::CircuitBreaker;

        let call = self
            .inner
            .generate(prompt, system_instruction, options);

        match self.breaker.call_with(counts_as_failure, call).await {
            Ok(text) => Ok(text),
            Err(failsafe::Error::Inner(e)) => Err(e),
            Err(failsafe::Error::Rejected) => {
                tracing::warn!("Generation circuit is open, rejecting call");
                Err(AppError::generation(
                    GenerationFailureKind::CircuitOpen,
                    "Text generation temporarily disabled after repeated failures",
                ))
            }
        }
    }
}

/// Bounded retry with exponential backoff for transient generation errors.
///
/// Owned by the host application; the composer only asks it to run an
/// operation. Non-transient errors are returned after the first attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
        }
    }

    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: initial_backoff.min(max_backoff),
            max_backoff,
        }
    }

    /// Delays between attempts: the initial backoff doubled each time,
    /// capped at `max_backoff`. Sub-second values are allowed.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let initial = self.initial_backoff.min(self.max_backoff);
        let max = self.max_backoff;
        (0u32..).map(move |n| {
            initial
                .saturating_mul(2u32.saturating_pow(n))
                .min(max)
        })
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delays = self.delays();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = delays.next().unwrap_or(self.max_backoff);
                    tracing::warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failsafe::{CircuitBreaker, Error};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_generation_circuit_breaker();

        // Simulate 5 consecutive failures
        for _ in 0..5 {
            let result: Result<(), Error<&str>> = cb.call(|| Err::<(), &str>("simulated error"));
            assert!(result.is_err());
        }

        // Next call should be rejected (circuit is open)
        let result: Result<(), Error<&str>> = cb.call(|| Ok::<(), &str>(()));

        match result {
            Err(Error::Rejected) => {}
            _ => panic!("Expected circuit to be open and reject requests"),
        }
    }

    #[test]
    fn test_circuit_breaker_allows_success() {
        let cb = create_generation_circuit_breaker();

        let result: Result<i32, Error<&str>> = cb.call(|| Ok::<i32, &str>(42));

        assert_eq!(result.unwrap(), 42);
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_delays_double_up_to_the_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), Duration::from_millis(1500));
        let delays: Vec<Duration> = policy.delays().take(4).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(1500),
            ]
        );
    }

    #[tokio::test]
    async fn test_sub_second_default_backoff_runs_operation() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = RetryPolicy::new(1, Duration::from_millis(500), Duration::from_secs(5))
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>("ok")
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = fast_policy(3)
            .run(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AppError::generation(GenerationFailureKind::RateLimited, "429"))
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), AppError> = fast_policy(3)
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::generation(GenerationFailureKind::Upstream, "503"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), AppError> = fast_policy(5)
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::generation(GenerationFailureKind::Unauthorized, "401"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_policy_makes_one_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let _: Result<(), AppError> = RetryPolicy::default()
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::generation(GenerationFailureKind::Timeout, "slow"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
