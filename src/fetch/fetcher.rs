//! Fetch entry points over a [`DocumentSource`].
//!
//! - `fetch_async` runs one attempt on the worker pool and reports through a
//!   callback, exactly once, even if the source hangs.
//! - `fetch_sync` blocks the caller on a dedicated channel until the fetch
//!   reports or its own deadline passes. Called from the thread that drives
//!   a current-thread pool, it runs the fetch on a separate thread.
//! - `fetch_with_retry` retries failures with exponential backoff:
//!
//! ```text
//! delay(attempt) = base * 2^(attempt - 1)
//! ```
//!
//! Backoff is a timer, not a sleeping thread, so other fetches keep running.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::cache::entry::ScreenId;
use crate::config::NetworkConfig;
use crate::error::FetchError;
use crate::fetch::source::{DocumentSource, FetchOutcome};
use crate::runtime::run_blocking;

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&NetworkConfig> for RetryPolicy {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base_delay(),
        }
    }
}

/// Stateless fetcher; holds only its source, pool handle and timing settings.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn DocumentSource>,
    handle: Handle,
    retry: RetryPolicy,
    /// Upper bound before an async fetch reports `timed out`.
    deadline: Duration,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        handle: Handle,
        retry: RetryPolicy,
        deadline: Duration,
    ) -> Self {
        Self {
            source,
            handle,
            retry,
            deadline,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetch on the worker pool and call `on_complete` once with the outcome.
    ///
    /// The callback runs on a pool thread, never on the caller's thread.
    pub fn fetch_async<F>(&self, screen_id: ScreenId, on_complete: F)
    where
        F: FnOnce(FetchOutcome) + Send + 'static,
    {
        let attempt = single_attempt(self.source.clone(), screen_id, self.deadline);
        self.handle.spawn(async move {
            on_complete(attempt.await);
        });
    }

    /// Fetch and block the calling thread for at most `timeout`.
    pub fn fetch_sync(&self, screen_id: ScreenId, timeout: Duration) -> FetchOutcome {
        let attempt = single_attempt(self.source.clone(), screen_id, self.deadline);
        run_blocking(&self.handle, attempt, timeout).unwrap_or_else(|| Err(FetchError::timed_out()))
    }

    /// Fetch with up to `max_attempts` attempts (at least one).
    ///
    /// Returns the first success, or the last failure unchanged.
    pub async fn fetch_with_retry(&self, screen_id: &ScreenId, max_attempts: u32) -> FetchOutcome {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.deadline, self.source.fetch(screen_id)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::timed_out()),
            };

            match outcome {
                Ok(document) => {
                    if attempt > 1 {
                        info!(%screen_id, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(document);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!(%screen_id, attempts = attempt, error = %e, "Fetch failed");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        %screen_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// `fetch_with_retry` using the configured attempt count.
    pub async fn fetch(&self, screen_id: &ScreenId) -> FetchOutcome {
        self.fetch_with_retry(screen_id, self.retry.max_attempts).await
    }
}

/// One fetch bounded by `deadline`.
async fn single_attempt(
    source: Arc<dyn DocumentSource>,
    screen_id: ScreenId,
    deadline: Duration,
) -> FetchOutcome {
    match tokio::time::timeout(deadline, source.fetch(&screen_id)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(%screen_id, deadline_ms = deadline.as_millis() as u64, "Fetch timed out");
            Err(FetchError::timed_out())
        }
    }
}
