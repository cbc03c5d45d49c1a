//! Bounded polling until a resource converges
//!
//! The API server delivers effects asynchronously: scaling a ReplicaSet
//! only records intent, and the pods become available some time later. This
//! module provides a deadline-bounded poll loop plus the two predicates the
//! cutover sequence needs: "all replicas available" and "resource gone".
//!
//! A timeout is an [`Error::Timeout`] and is deliberately non-fatal at most
//! call sites: a workload stuck failing to become available (for example a
//! bad image reference) must not wedge the cutover, because this controller
//! has no rollback and would otherwise never retire the other color.

use std::time::Duration;

use tracing::debug;

use crate::store::Store;
use crate::{Error, Result};

/// Poll cadence and deadline for convergence waits
#[derive(Clone, Debug)]
pub struct WaitConfig {
    /// Interval between polls
    pub poll_interval: Duration,
    /// Total time to wait before giving up
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Poll `condition` until it holds or the deadline passes.
///
/// The condition is evaluated immediately, then once per poll interval.
/// Returns [`Error::Timeout`] when the deadline would be exceeded by the
/// next poll; observation errors from the condition abort the wait and are
/// returned as-is.
pub async fn poll_until<F, Fut>(config: &WaitConfig, what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + config.timeout;

    loop {
        if condition().await? {
            return Ok(());
        }

        if tokio::time::Instant::now() + config.poll_interval > deadline {
            return Err(Error::timeout(what));
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}

/// Wait until a ReplicaSet has observed its latest spec and reports the
/// desired number of available replicas.
///
/// `desired_generation` is the metadata generation at which the replica
/// count was last written; checking `observedGeneration` against it avoids
/// trusting a stale status from before the write.
pub async fn await_replica_set_available(
    store: &dyn Store,
    config: &WaitConfig,
    namespace: &str,
    name: &str,
    desired_generation: i64,
    desired_replicas: i32,
) -> Result<()> {
    debug!(
        replica_set = %name,
        replicas = desired_replicas,
        "waiting for all replicas to become available"
    );
    poll_until(
        config,
        &format!("replica set {name} to have {desired_replicas} available replicas"),
        || async move {
            let rs = store
                .get_replica_set(namespace, name)
                .await?
                .ok_or_else(|| Error::not_found(name))?;
            let status = match rs.status {
                Some(s) => s,
                None => return Ok(false),
            };
            Ok(status.observed_generation.unwrap_or(0) >= desired_generation
                && status.available_replicas.unwrap_or(0) == desired_replicas)
        },
    )
    .await
}

/// Wait until a ReplicaSet is fully gone from the store.
///
/// Used during replacement: the inactive ReplicaSet must complete its
/// deletion before an equivalently-named one can be created.
pub async fn await_replica_set_absent(
    store: &dyn Store,
    config: &WaitConfig,
    namespace: &str,
    name: &str,
) -> Result<()> {
    debug!(replica_set = %name, "waiting for deletion to complete");
    poll_until(
        config,
        &format!("replica set {name} to complete deletion"),
        || async move { Ok(store.get_replica_set(namespace, name).await?.is_none()) },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    fn fast_config() -> WaitConfig {
        WaitConfig {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_converged_condition_returns_immediately() {
        let result = poll_until(&fast_config(), "nothing", || async { Ok(true) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_condition_polled_until_it_holds() {
        let polls = Arc::new(AtomicU32::new(0));
        let p = polls.clone();

        let result = poll_until(&fast_config(), "three polls", || {
            let p = p.clone();
            async move { Ok(p.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    /// The wait must never block past its deadline; a stuck workload is
    /// reported as a timeout and left for the caller to absorb.
    #[tokio::test]
    async fn test_never_converging_condition_times_out() {
        let start = Instant::now();
        let result = poll_until(&fast_config(), "replica set blue-rs", || async { Ok(false) }).await;

        match result {
            Err(e) => {
                assert!(e.is_timeout());
                assert!(e.to_string().contains("blue-rs"));
            }
            Ok(()) => panic!("expected timeout"),
        }
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "wait must respect its deadline"
        );
    }

    #[tokio::test]
    async fn test_observation_error_aborts_wait() {
        let result = poll_until(&fast_config(), "anything", || async {
            Err(Error::serialization("fetch exploded"))
        })
        .await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
