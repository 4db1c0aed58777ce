//! Bounded retry executor.
//!
//! Runs asynchronous tasks under a shared concurrency cap, retrying failed
//! attempts after a fixed delay. There is no timeout: a task that hangs keeps
//! its slot and only reports itself through periodic "still running" notices.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{interval_at, Instant};
use tracing::{error, warn};

use crate::errors::RetryExhausted;

/// Configuration for a [`RetryExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Total attempts per task, including the first one.
    pub max_attempts: u32,
    /// Delay between a failed attempt and the next one.
    pub retry_interval: Duration,
    /// Tasks allowed in flight at once across all callers.
    pub max_concurrency: usize,
    /// Running time after which a notice is logged, and every period after.
    /// Zero disables the notices.
    pub slow_threshold: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_interval: Duration::from_secs(5),
            max_concurrency: 10,
            slow_threshold: Duration::from_secs(30),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_slow_threshold(mut self, slow_threshold: Duration) -> Self {
        self.slow_threshold = slow_threshold;
        self
    }
}

/// Per-call overrides for [`RetryExecutor::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub description: String,
    pub max_attempts: Option<u32>,
    pub retry_interval: Option<Duration>,
}

impl ExecuteOptions {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = Some(retry_interval);
        self
    }
}

/// Executes tasks with a concurrency cap and a bounded number of attempts.
///
/// One instance shares its slots between every caller. Use separate
/// instances for independent external sources so a slow one cannot starve
/// the others.
#[derive(Debug)]
pub struct RetryExecutor {
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    slow_notices: AtomicU64,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

impl RetryExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            config,
            semaphore,
            slow_notices: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Slots currently free.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// "Still running" notices logged so far.
    pub fn slow_notices(&self) -> u64 {
        self.slow_notices.load(Ordering::Relaxed)
    }

    /// Run `task` until it succeeds or the attempt budget is spent.
    ///
    /// The slot is held from the first attempt until the task settles,
    /// retry delays included, and is released on every exit path. Retries
    /// repeat the task's side effects, so `task` should be idempotent.
    pub async fn execute<T, E, F, Fut>(
        &self,
        options: ExecuteOptions,
        mut task: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = options.max_attempts.unwrap_or(self.config.max_attempts).max(1);
        let retry_interval = options.retry_interval.unwrap_or(self.config.retry_interval);
        let description = options.description;

        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                warn!(
                    description = %description,
                    error = %e,
                    "Concurrency gate closed, running ungated"
                );
                None
            }
        };

        let mut attempt = 1;
        loop {
            match self.run_attempt(&description, task()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        description = %description,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Task failed, retrying in {:?}",
                        retry_interval
                    );
                    tokio::time::sleep(retry_interval).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        description = %description,
                        attempts = attempt,
                        error = %e,
                        "Task failed on every attempt"
                    );
                    return Err(RetryExhausted::new(description, attempt, e));
                }
            }
        }
    }

    /// Await one attempt, logging a notice each time it outlives the slow threshold.
    async fn run_attempt<T, E, Fut>(&self, description: &str, attempt: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let threshold = self.config.slow_threshold;
        if threshold.is_zero() {
            return attempt.await;
        }

        let started = Instant::now();
        let mut notices = interval_at(started + threshold, threshold);
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                biased;
                result = &mut attempt => return result,
                _ = notices.tick() => {
                    self.slow_notices.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        description = %description,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Task still running"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize};

    fn executor(max_attempts: u32, interval_ms: u64, concurrency: usize) -> RetryExecutor {
        RetryExecutor::new(
            ExecutorConfig::default()
                .with_max_attempts(max_attempts)
                .with_retry_interval(Duration::from_millis(interval_ms))
                .with_max_concurrency(concurrency),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt_after_waiting() {
        let executor = executor(4, 1000, 1);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = executor
            .execute(ExecuteOptions::new("flaky"), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 4);
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(executor.available_slots(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_keeps_last_error() {
        let executor = executor(3, 10, 1);
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(ExecuteOptions::new("always fails"), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(format!("failure {n}"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 3);
        assert_eq!(err.last_error(), "failure 3");
        assert_eq!(err.description(), "always fails");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.available_slots(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_options_override_config() {
        let executor = executor(5, 10_000, 1);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = executor
            .execute(
                ExecuteOptions::new("override")
                    .with_max_attempts(2)
                    .with_retry_interval(Duration::from_millis(50)),
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("nope")
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), 2);
        assert!(started.elapsed() < Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_shared() {
        let executor = executor(1, 0, 2);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let tasks = (0..5).map(|i| {
            let executor = &executor;
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                executor
                    .execute(ExecuteOptions::new(format!("task {i}")), || async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(i)
                    })
                    .await
            }
        });

        let results = futures::future::join_all(tasks).await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(executor.available_slots(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_is_not_cancelled_and_reports_each_period() {
        let executor = RetryExecutor::new(
            ExecutorConfig::default()
                .with_max_attempts(1)
                .with_slow_threshold(Duration::from_millis(100)),
        );

        let result = executor
            .execute(ExecuteOptions::new("slow"), || async {
                tokio::time::sleep(Duration::from_millis(350)).await;
                Ok::<_, String>("done")
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(executor.slow_notices(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_threshold_disables_notices() {
        let executor =
            RetryExecutor::new(ExecutorConfig::default().with_slow_threshold(Duration::ZERO));

        executor
            .execute(ExecuteOptions::new("quiet"), || async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap();

        assert_eq!(executor.slow_notices(), 0);
    }
}
