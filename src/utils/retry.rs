//! Retry utilities for remote calls
//!
//! [`Backoff`] wraps a single remote call and absorbs every retryable
//! [`FetchError`]:
//!
//! - `RateLimited { wait }` sleeps for `wait` and retries, the backoff delay is
//!   left untouched
//! - `Transient` sleeps a fixed short delay and retries
//! - `Backoff` sleeps the current exponential delay, then doubles it up to the cap
//! - `Fatal` is returned to the caller immediately
//!
//! Retries are unbounded in count. Only the per-attempt delay is bounded.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BackoffConfig;
use crate::metrics;
use crate::utils::error::FetchError;

/// Something that can wait
///
/// Production code sleeps on the tokio timer. Tests substitute a recorder so
/// waits can be asserted without spending wall-clock time.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by `tokio::time::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Per-call retry state
#[derive(Debug, Clone)]
pub struct Attempt {
    delay: Duration,
    retries: u32,
}

impl Attempt {
    /// Number of waits performed so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Delay the next exponential wait will use
    pub fn next_delay(&self) -> Duration {
        self.delay
    }
}

/// Retry policy with rate-limit awareness
#[derive(Clone)]
pub struct Backoff {
    config: BackoffConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Backoff {
    /// Create a policy that sleeps on the tokio timer
    pub fn new(config: BackoffConfig) -> Self {
        Self::with_sleeper(config, Arc::new(TokioSleeper))
    }

    /// Create a policy with a custom sleeper
    pub fn with_sleeper(config: BackoffConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { config, sleeper }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Fresh state for one logical call
    pub fn start(&self) -> Attempt {
        Attempt {
            delay: self.config.base_delay(),
            retries: 0,
        }
    }

    /// Absorb one failure.
    ///
    /// Waits as the error's classification dictates and returns `Ok(())` when
    /// the caller should try again, or hands back a fatal error.
    pub async fn absorb(&self, attempt: &mut Attempt, err: FetchError) -> Result<(), FetchError> {
        let wait = match &err {
            FetchError::Fatal(_) => {
                warn!(error = %err, "Non-retryable error encountered");
                return Err(err);
            }
            FetchError::RateLimited { wait } => {
                warn!(wait_secs = wait.as_secs(), "Rate limit hit, waiting before retry");
                *wait
            }
            FetchError::Transient(reason) => {
                warn!(
                    reason = %reason,
                    wait_secs = self.config.transient_delay_secs,
                    "Transient error, retrying"
                );
                self.config.transient_delay()
            }
            FetchError::Backoff(reason) => {
                let wait = attempt.delay;
                attempt.delay = (attempt.delay * 2).min(self.config.max_delay());
                warn!(
                    reason = %reason,
                    wait_secs = wait.as_secs(),
                    "Upstream error, backing off"
                );
                wait
            }
        };

        metrics::record_retry_wait(err.kind(), wait);
        attempt.retries += 1;
        self.sleeper.sleep(wait).await;
        Ok(())
    }

    /// Run `operation` until it succeeds or fails fatally
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, FetchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = self.start();
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt.retries > 0 {
                        debug!(retries = attempt.retries, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => self.absorb(&mut attempt, err).await?,
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Sleeper that records requested waits and returns immediately
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        waits: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn waits(&self) -> Vec<Duration> {
            self.waits.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    pub fn recording_backoff() -> (Backoff, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::default());
        let backoff = Backoff::with_sleeper(BackoffConfig::default(), sleeper.clone());
        (backoff, sleeper)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::recording_backoff;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_first_attempt() {
        let (backoff, sleeper) = recording_backoff();
        let result = backoff.run(move || async move { Ok::<_, FetchError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn test_three_transient_failures_then_success() {
        let (backoff, sleeper) = recording_backoff();
        let calls = &AtomicU32::new(0);

        let result = backoff
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(FetchError::Transient("connection reset".into()))
                } else {
                    Ok("value")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(5); 3]);
    }

    #[tokio::test]
    async fn test_rate_limit_message_waits_five_minutes() {
        let (backoff, sleeper) = recording_backoff();
        let calls = &AtomicU32::new(0);

        let result = backoff
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FetchError::rate_limited_from_message(
                        "you are doing that too much. try again in 5 minutes.",
                        Duration::from_secs(60),
                    ))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(300)]);
    }

    #[tokio::test]
    async fn test_exponential_delay_doubles_and_caps() {
        let (backoff, sleeper) = recording_backoff();
        let calls = &AtomicU32::new(0);

        let result = backoff
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 9 {
                    Err(FetchError::Backoff("HTTP 503".into()))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        let secs: Vec<u64> = sleeper.waits().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![2, 4, 8, 16, 32, 64, 128, 256, 300]);
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_grow_delay() {
        let (backoff, sleeper) = recording_backoff();
        let mut attempt = backoff.start();

        backoff
            .absorb(&mut attempt, FetchError::Backoff("HTTP 500".into()))
            .await
            .unwrap();
        backoff
            .absorb(
                &mut attempt,
                FetchError::RateLimited {
                    wait: Duration::from_secs(60),
                },
            )
            .await
            .unwrap();
        backoff
            .absorb(&mut attempt, FetchError::Backoff("HTTP 500".into()))
            .await
            .unwrap();

        let secs: Vec<u64> = sleeper.waits().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![2, 60, 4]);
        assert_eq!(attempt.retries(), 3);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let (backoff, sleeper) = recording_backoff();
        let calls = &AtomicU32::new(0);

        let result: Result<(), FetchError> = backoff
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Fatal("HTTP 403".into()))
            })
            .await;

        assert_eq!(result.unwrap_err(), FetchError::Fatal("HTTP 403".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_advances_virtual_time() {
        let backoff = Backoff::new(BackoffConfig::default());
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        backoff
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(FetchError::Transient("timeout".into()))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
