//! Exponential backoff for upstream calls.
use log::warn;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self { attempts: attempts.max(1), base_delay }
    }

    /// Wait after the `failures`-th consecutive failure (0-based):
    /// base, 2*base, 4*base, ...
    pub fn delay(&self, failures: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(failures))
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or the
    /// attempt ceiling is reached. The last error is returned unchanged.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        should_retry: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts || !should_retry(&e) => return Err(e),
                Err(e) => {
                    let wait = self.delay(attempt - 1);
                    warn!(
                        "{label}: attempt {attempt}/{} failed: {e}; retrying in {wait:?}",
                        self.attempts
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
