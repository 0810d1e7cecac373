// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Shared by the repository's write-back, delete and load paths, and by the
//! transport when it establishes its first connection.
//!
//! The delay after failed attempt `n` (0-indexed) is `initial_delay * factor^n`,
//! capped at `max_delay`. With the repository preset the factor is 2 and
//! there is no cap, so a write that fails twice and then succeeds waits
//! `base + 2 * base` in total.
//!
//! # Example
//!
//! ```
//! use shard_cache::{RepoConfig, RetryConfig};
//! use std::time::Duration;
//!
//! // The transport's first connect gives up after five attempts
//! assert_eq!(RetryConfig::startup().max_retries, Some(5));
//!
//! // Repository writes follow the repository's own settings
//! let repo = RetryConfig::for_repo(&RepoConfig::new("farms"));
//! assert_eq!(repo.max_retries, Some(3));
//! assert_eq!(repo.initial_delay, Duration::from_millis(100));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RepoConfig;

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - Bounded attempts for the transport's first connect
/// - [`RetryConfig::for_repo()`] - Storage writes of one repository
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts (not re-attempts). `None` retries forever.
    pub max_retries: Option<usize>,
}

impl RetryConfig {
    /// Five attempts over roughly three seconds, then the connect error surfaces.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Plain doubling backoff driven by a repository's `max_retries` and
    /// `retry_base_delay`, uncapped. A `max_retries` of zero still makes one
    /// attempt.
    #[must_use]
    pub fn for_repo(config: &RepoConfig) -> Self {
        Self {
            max_retries: Some(config.max_retries.max(1) as usize),
            initial_delay: config.retry_base_delay(),
            max_delay: Duration::MAX,
            factor: 2.0,
        }
    }

    /// Backoff after waiting `delay`, never beyond `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Retry `operation` on every error until it succeeds or attempts run out.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, operation, |_| true).await
}

/// Like [`retry`], but gives up immediately when `should_retry` rejects the error.
///
/// The returned error is always the one from the last attempt made.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Recovered after retrying");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if !should_retry(&err) {
                    return Err(err);
                }

                if matches!(config.max_retries, Some(max) if attempts >= max) {
                    return Err(err);
                }
                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max = ?config.max_retries,
                    error = %err,
                    backoff = ?delay,
                    "Attempt failed, backing off"
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
