/// Recurring Task Scheduler with Circuit Breaker
///
/// Runs a task on a fixed interval with failure tracking and exponential
/// backoff, so a flapping exchange or database cannot silently disable the
/// trading loop. Too many consecutive failures panic the process rather
/// than letting a critical background task degrade unnoticed.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Circuit breaker configuration for background tasks
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum number of consecutive failures before panic
    pub max_consecutive_failures: u32,
    /// Initial delay appended after a failed run
    pub initial_retry_delay: Duration,
    /// Maximum delay appended after a failed run
    pub max_retry_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            initial_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(120),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

impl CircuitBreakerState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_retry_delay: initial_delay,
        }
    }

    fn record_failure(&mut self, max_delay: Duration) {
        self.consecutive_failures += 1;
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
    }

    fn reset(&mut self, initial_delay: Duration) {
        self.consecutive_failures = 0;
        self.current_retry_delay = initial_delay;
    }
}

/// Run a task every `interval` until the process exits.
///
/// Each tick runs one iteration. A failed iteration counts toward the
/// circuit breaker and adds a backoff delay on top of the interval; a
/// success resets both. After `max_consecutive_failures` consecutive
/// failures the function panics so the supervisor restarts the process
/// instead of trading on a dead loop.
///
/// # Panics
/// Panics after `max_consecutive_failures` consecutive failures.
pub async fn run_recurring<F, Fut>(
    task_name: &str,
    interval: Duration,
    config: CircuitBreakerConfig,
    mut task_fn: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let mut state = CircuitBreakerState::new(config.initial_retry_delay);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match task_fn().await {
            Ok(()) => {
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.reset(config.initial_retry_delay);
            }
            Err(e) => {
                state.record_failure(config.max_retry_delay);
                error!(
                    "Task '{}' failed (attempt {}/{}): {}",
                    task_name, state.consecutive_failures, config.max_consecutive_failures, e
                );

                if state.consecutive_failures >= config.max_consecutive_failures {
                    panic!(
                        "FATAL: Task '{}' exceeded maximum consecutive failures ({}). \
                         Last error: {}. System cannot continue with failed critical task.",
                        task_name, config.max_consecutive_failures, e
                    );
                }

                warn!(
                    "Task '{}' backing off {:?} before next tick",
                    task_name, state.current_retry_delay
                );
                sleep(state.current_retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn recurring_task_recovers_after_failures() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let attempt_count_clone = attempt_count.clone();

        let config = CircuitBreakerConfig {
            max_consecutive_failures: 5,
            initial_retry_delay: Duration::from_millis(5),
            max_retry_delay: Duration::from_millis(20),
        };

        let handle = tokio::spawn(async move {
            run_recurring("test_task", Duration::from_millis(5), config, || {
                let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err("Simulated failure".to_string())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        assert!(attempt_count.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    #[should_panic(expected = "exceeded maximum consecutive failures")]
    async fn recurring_task_panics_on_max_failures() {
        let config = CircuitBreakerConfig {
            max_consecutive_failures: 3,
            initial_retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(5),
        };

        run_recurring("failing_task", Duration::from_millis(1), config, || async {
            Err("Always fails".to_string())
        })
        .await;
    }
}
