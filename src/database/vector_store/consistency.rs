// Read-after-write polling for the eventually consistent remote index

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::VectorConfig;
use crate::database::RemoteIndex;

/// How long to wait for written vectors to become visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl ConsistencyPolicy {
    #[inline]
    pub fn from_config(config: &VectorConfig) -> Self {
        Self {
            attempts: config.consistency_attempts.max(1),
            interval: Duration::from_millis(config.consistency_interval_ms),
        }
    }
}

/// Outcome of polling the remote count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub expected: usize,
    /// Last count successfully read, if any
    pub observed: Option<usize>,
    pub attempts: u32,
    pub confirmed: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn summary(&self) -> String {
        match (self.confirmed, self.observed) {
            (true, Some(observed)) => format!(
                "confirmed {} of {} vectors after {} checks",
                observed, self.expected, self.attempts
            ),
            (_, Some(observed)) => format!(
                "saw {} of {} vectors after {} checks",
                observed, self.expected, self.attempts
            ),
            (_, None) => format!("count unavailable after {} checks", self.attempts),
        }
    }
}

/// Poll the remote count until it reaches `expected` or the attempts run out.
///
/// Running out is not an error: the write already succeeded and the index
/// will catch up on its own.
#[inline]
pub async fn wait_for_count(
    index: &dyn RemoteIndex,
    expected: usize,
    policy: ConsistencyPolicy,
) -> ConsistencyReport {
    let mut report = ConsistencyReport {
        expected,
        observed: None,
        attempts: 0,
        confirmed: false,
    };

    for attempt in 1..=policy.attempts {
        report.attempts = attempt;
        match index.count().await {
            Ok(count) => {
                report.observed = Some(count);
                if count >= expected {
                    report.confirmed = true;
                    debug!("Remote index shows {} vectors (attempt {})", count, attempt);
                    return report;
                }
                debug!(
                    "Remote index shows {}/{} vectors, attempt {}/{}",
                    count, expected, attempt, policy.attempts
                );
            }
            Err(e) => warn!(
                "Count check failed, attempt {}/{}: {}",
                attempt, policy.attempts, e
            ),
        }

        if attempt < policy.attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    info!(
        "Remote index not yet consistent ({}), continuing",
        report.summary()
    );
    report
}
