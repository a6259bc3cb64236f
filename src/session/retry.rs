use std::thread;
use std::time::Duration;

use crate::config::Config;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(150),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.load_retry_attempts.max(1),
            backoff: Duration::from_millis(config.load_retry_backoff_ms),
        }
    }

    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Duration::ZERO,
        }
    }

    /// Linear: the wait after attempt `n` is `n * backoff`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    /// Runs `op` until it succeeds or the attempts are used up. On exhaustion
    /// returns the last error together with the number of attempts made.
    pub fn run<T, E>(&self, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T, (E, u32)> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => return Err((err, attempt)),
                Err(_) => {
                    let delay = self.delay_after(attempt);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
