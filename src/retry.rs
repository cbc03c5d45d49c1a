//! Conflict retry with exponential backoff and jitter
//!
//! All mutation in this operator is read-modify-write against the API
//! server's optimistic concurrency: fetch the current object, apply a
//! mutation to the fresh copy, and write it back with its resourceVersion.
//! When the write loses a race with a concurrent writer the server rejects
//! it with a 409 conflict, and the whole cycle is retried here with
//! exponential backoff and jitter.
//!
//! # Example
//!
//! ```ignore
//! use bluegreen::retry::{retry_on_conflict, RetryConfig};
//!
//! let updated = retry_on_conflict(&RetryConfig::default(), "blue-rs", || async {
//!     let mut rs = store.get_replica_set(ns, "blue-rs").await?
//!         .ok_or_else(|| Error::not_found("blue-rs"))?;
//!     rs.spec.get_or_insert_with(Default::default).replicas = Some(0);
//!     store.update_replica_set(&rs).await
//! })
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Configuration for conflict-retried updates
///
/// The budget is bounded: once `max_attempts` writes have conflicted the
/// update fails with [`Error::ConflictExhausted`] rather than spinning
/// forever against a contended resource.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = unbounded)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Execute a fetch-mutate-write cycle, retrying on version conflicts.
///
/// The operation must perform the *complete* cycle each attempt so the
/// mutation is applied to the freshest copy; closing over a stale object
/// defeats conflict resolution. Non-conflict errors are returned
/// immediately without retry.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `resource` - Resource name for logging and the terminal error
/// * `operation` - The full read-modify-write cycle to retry
///
/// # Returns
/// The successful write result, the first non-conflict error, or
/// [`Error::ConflictExhausted`] once the budget is spent.
pub async fn retry_on_conflict<T, F, Fut>(
    config: &RetryConfig,
    resource: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        resource = %resource,
                        attempt = attempt,
                        "update kept conflicting, giving up"
                    );
                    return Err(Error::conflict_exhausted(resource, attempt));
                }

                // Jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    resource = %resource,
                    attempt = attempt,
                    delay_ms = jittered_delay.as_millis(),
                    "write conflicted, retrying with fresh copy"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use kube::core::ErrorResponse;

    fn conflict() -> Error {
        Error::Kube(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let result = retry_on_conflict(&fast_config(3), "bgd", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    /// Exactly N conflicts then success: the mutation lands once and the
    /// number of observed conflicts equals N.
    #[tokio::test]
    async fn test_applies_once_after_n_conflicts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry_on_conflict(&fast_config(10), "bgd", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(conflict())
                } else {
                    Ok("written")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "written");
        // 3 conflicts observed, then one successful write
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exhausts_budget_with_terminal_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), Error> = retry_on_conflict(&fast_config(3), "blue-rs", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(conflict())
            }
        })
        .await;

        match result {
            Err(Error::ConflictExhausted { resource, attempts }) => {
                assert_eq!(resource, "blue-rs");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected ConflictExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    /// Non-conflict errors must surface immediately; retrying a 500 would
    /// only hide a real failure.
    #[tokio::test]
    async fn test_non_conflict_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<(), Error> = retry_on_conflict(&fast_config(5), "bgd", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::serialization("broken"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Serialization(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
