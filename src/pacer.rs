// Retry pacing for control-plane calls (mkdir, list, finalize, session
// cleanup).
//
// A `Pacer` keeps one sleep interval shared by every call that goes
// through it. Retryable failures stretch the interval by the attack
// constant up to `max_sleep`; successes shrink it by the decay constant
// down to `min_sleep`. There is no retry limit: a call only gives up on a
// fatal error or when its cancellation token fires.

use crate::error::UploadError;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_MIN_SLEEP: Duration = Duration::from_millis(400);
pub const DEFAULT_MAX_SLEEP: Duration = Duration::from_secs(5);
pub const DEFAULT_DECAY_CONSTANT: u32 = 2;
pub const DEFAULT_ATTACK_CONSTANT: u32 = 1;

// Larger shifts overflow the interval arithmetic.
const MAX_CONSTANT: u32 = 16;

#[derive(Debug)]
pub struct Pacer {
    min_sleep: Duration,
    max_sleep: Duration,
    decay_constant: u32,
    attack_constant: u32,
    sleep_time: Mutex<Duration>,
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SLEEP, DEFAULT_MAX_SLEEP)
    }
}

impl Pacer {
    pub fn new(min_sleep: Duration, max_sleep: Duration) -> Self {
        let max_sleep = max_sleep.max(min_sleep);
        Self {
            min_sleep,
            max_sleep,
            decay_constant: DEFAULT_DECAY_CONSTANT,
            attack_constant: DEFAULT_ATTACK_CONSTANT,
            sleep_time: Mutex::new(min_sleep),
        }
    }

    pub fn with_decay_constant(mut self, decay_constant: u32) -> Self {
        self.decay_constant = decay_constant.min(MAX_CONSTANT);
        self
    }

    pub fn with_attack_constant(mut self, attack_constant: u32) -> Self {
        self.attack_constant = attack_constant.min(MAX_CONSTANT);
        self
    }

    /// Interval the next retry will wait.
    pub fn sleep_time(&self) -> Duration {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Duration> {
        // The guarded value is a plain Duration; a poisoned lock still holds
        // a usable interval.
        self.sleep_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the interval to wait now and stretches the one after it.
    fn on_retry(&self) -> Duration {
        let mut sleep = self.lock();
        let wait = *sleep;
        *sleep = if self.attack_constant == 0 {
            self.max_sleep
        } else {
            let factor = 1u32 << self.attack_constant;
            wait.checked_mul(factor)
                .map(|d| d / (factor - 1))
                .unwrap_or(self.max_sleep)
                .min(self.max_sleep)
        };
        wait
    }

    fn on_success(&self) {
        let mut sleep = self.lock();
        let factor = 1u32 << self.decay_constant;
        let decayed = sleep
            .checked_mul(factor - 1)
            .map(|d| d / factor)
            .unwrap_or(self.min_sleep);
        *sleep = decayed.max(self.min_sleep);
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// `cancel` fires. Cancellation wins over everything, including an
    /// in-flight attempt and a pending backoff.
    pub async fn call<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T, UploadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                result = op() => result,
            };

            match result {
                Ok(value) => {
                    self.on_success();
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    let wait = self.on_retry();
                    debug!(attempt, error = %err, wait_ms = wait.as_millis() as u64, "retrying call");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
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
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn unavailable() -> UploadError {
        UploadError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "busy".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success_with_growing_backoff() {
        let pacer = Pacer::new(Duration::from_millis(100), Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let seen = calls.clone();
        let result = pacer
            .call(&cancel, || {
                let seen = seen.clone();
                async move {
                    let mut seen = seen.lock().unwrap();
                    seen.push(Instant::now());
                    if seen.len() < 5 {
                        Err(unavailable())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 5);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_millis(100));
        assert!(gaps.windows(2).all(|w| w[1] >= w[0]), "gaps: {:?}", gaps);
        assert!(gaps[3] >= Duration::from_millis(800) && gaps[3] < Duration::from_millis(810));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_caps_at_max_sleep() {
        let pacer = Pacer::new(Duration::from_millis(100), Duration::from_millis(300));
        for _ in 0..10 {
            pacer.on_retry();
        }
        assert_eq!(pacer.sleep_time(), Duration::from_millis(300));
    }

    #[test]
    fn test_success_decays_toward_min() {
        let pacer = Pacer::new(Duration::from_millis(100), Duration::from_secs(10));
        for _ in 0..4 {
            pacer.on_retry();
        }
        assert_eq!(pacer.sleep_time(), Duration::from_millis(1600));

        pacer.on_success();
        assert_eq!(pacer.sleep_time(), Duration::from_millis(1200));
        for _ in 0..20 {
            pacer.on_success();
        }
        assert_eq!(pacer.sleep_time(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_attack_jumps_to_max() {
        let pacer = Pacer::new(Duration::from_millis(10), Duration::from_secs(2)).with_attack_constant(0);
        assert_eq!(pacer.on_retry(), Duration::from_millis(10));
        assert_eq!(pacer.sleep_time(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let pacer = Pacer::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = pacer
            .call(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(UploadError::Status {
                        status: StatusCode::FORBIDDEN,
                        body: String::new(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(UploadError::Status { status, .. }) if status == StatusCode::FORBIDDEN));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let pacer = Pacer::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = pacer
            .call(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_pending_backoff() {
        let pacer = Pacer::new(Duration::from_secs(60), Duration::from_secs(600));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let result: Result<(), _> = pacer.call(&cancel, || async { Err(unavailable()) }).await;

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
