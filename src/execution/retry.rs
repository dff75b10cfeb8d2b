use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

/// Time source for retry delays, injectable so tests never sleep for real
#[async_trait]
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that records requested sleeps and advances virtual time instantly
#[derive(Default)]
pub struct ManualClock {
    now_ms: Mutex<i64>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Mutex::new(start_ms),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.lock().map(|n| *n).unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        if let Ok(mut now) = self.now_ms.lock() {
            *now += duration.as_millis() as i64;
        }
    }
}

/// Fixed-delay retry: up to `max_attempts` tries, `delay` between two tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempts run out. `op` receives the
    /// 1-based attempt number. No sleep follows the final failure.
    pub async fn run<T, E, F, Fut>(
        &self,
        clock: &dyn Clock,
        what: &str,
        mut op: F,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    })
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed: {}, retrying in {}s (attempt {}/{})",
                        what,
                        e,
                        self.delay.as_secs(),
                        attempt,
                        max_attempts
                    );
                    clock.sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
