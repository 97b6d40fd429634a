// Blocking HTTP helpers shared by the Ollama and chat completion clients


use anyhow::{Result, anyhow};
use std::time::Duration;
use tracing::{debug, error, warn};

/// How a failed request should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    Fail,
}

/// Retry schedule with exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    /// Treat HTTP 429 as transient
    pub retry_rate_limits: bool,
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            retry_rate_limits: false,
        }
    }
}

impl RetryPolicy {
    /// Wait after the given failed attempt (1-based)
    #[inline]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Server errors and transport failures are transient, other statuses are not
    #[inline]
    pub fn classify(&self, error: &ureq::Error) -> Disposition {
        match error {
            ureq::Error::StatusCode(429) if self.retry_rate_limits => Disposition::Retry,
            ureq::Error::StatusCode(status) if *status >= 500 => Disposition::Retry,
            ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_) => Disposition::Retry,
            _ => Disposition::Fail,
        }
    }

    /// Run `request_fn` until it succeeds, fails permanently, or attempts run out
    #[inline]
    pub fn run<F>(&self, target: &str, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!("Request to {} attempt {}/{}", target, attempt, attempts);

            let error = match request_fn() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            if self.classify(&error) == Disposition::Fail {
                warn!("Request to {} failed permanently: {}", target, error);
                return Err(match error {
                    ureq::Error::StatusCode(status) => anyhow!("Client error: HTTP {}", status),
                    other => anyhow!("Non-retryable error: {}", other),
                });
            }

            warn!(
                "Request to {} failed: {}, attempt {}/{}",
                target, error, attempt, attempts
            );
            last_error = Some(error);

            if attempt < attempts {
                let delay = self.delay_after(attempt);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All {} attempts failed for {}", attempts, target);
        Err(match last_error {
            Some(error) => anyhow!("Request error after {} attempts: {}", attempts, error),
            None => anyhow!("Request failed after retries"),
        })
    }
}

/// Agent whose requests give up after `timeout`
#[inline]
pub fn agent_with_timeout(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}
