// File: testing-framework/src/node/waiters.rs
//
// Barriers
//
// A barrier polls an observable node predicate with bounded exponential
// backoff until it holds or the policy's timeout expires. These are the only
// points where the harness yields while a node makes progress.

use super::{ChainView, NodeRpc, TipInfo};
use crate::orchestrator::Clock;
use log::{debug, trace};
use minerid_common::crypto::Hash;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;

/// Polling schedule for one barrier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
            backoff_factor: 1.5,
        }
    }
}

impl WaitPolicy {
    fn next_interval(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_factor.max(1.0)).min(self.max_interval)
    }
}

/// Result of one poll
pub enum Probe<T> {
    Ready(T),
    /// Not there yet; carries a description of what was observed
    Pending(String),
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {waited:?} waiting for {what}; last observed: {last_observed}")]
    Timeout {
        what: String,
        waited: Duration,
        last_observed: String,
    },

    #[error("rpc failure while waiting for {what}: {source:#}")]
    Rpc {
        what: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Poll `probe` until it is ready or `policy.timeout` elapses.
///
/// An RPC error aborts the wait immediately.
pub async fn wait_until<T, F, Fut>(
    clock: &dyn Clock,
    policy: &WaitPolicy,
    what: &str,
    mut probe: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Probe<T>>>,
{
    let start = clock.now();
    let mut interval = policy.initial_interval;
    let mut polls = 0u32;
    loop {
        polls += 1;
        let observed = match probe().await {
            Ok(Probe::Ready(value)) => {
                if log::log_enabled!(log::Level::Debug) {
                    debug!(
                        "{} reached after {:?} ({} polls)",
                        what,
                        clock.now() - start,
                        polls
                    );
                }
                return Ok(value);
            }
            Ok(Probe::Pending(observed)) => observed,
            Err(source) => {
                return Err(WaitError::Rpc {
                    what: what.to_string(),
                    source,
                })
            }
        };

        let waited = clock.now() - start;
        if waited >= policy.timeout {
            return Err(WaitError::Timeout {
                what: what.to_string(),
                waited,
                last_observed: observed,
            });
        }
        trace!("waiting for {}: {}", what, observed);
        clock.sleep(interval.min(policy.timeout - waited)).await;
        interval = policy.next_interval(interval);
    }
}

/// Wait until `txid` is in the node's mempool
pub async fn wait_for_mempool_tx(
    clock: &dyn Clock,
    policy: &WaitPolicy,
    node: &dyn NodeRpc,
    txid: &Hash,
) -> Result<(), WaitError> {
    let what = format!("{} in mempool of {}", txid, node.label());
    wait_until(clock, policy, &what, || async move {
        let mempool = node.get_raw_mempool().await?;
        Ok::<_, anyhow::Error>(if mempool.contains(txid) {
            Probe::Ready(())
        } else {
            Probe::Pending(format!("{} mempool entries", mempool.len()))
        })
    })
    .await
}

/// Wait until the node's block count reaches at least `height`.
/// Returns the count observed when the barrier released.
pub async fn wait_for_height(
    clock: &dyn Clock,
    policy: &WaitPolicy,
    node: &dyn NodeRpc,
    height: u64,
) -> Result<u64, WaitError> {
    let what = format!("{} to reach height {}", node.label(), height);
    wait_until(clock, policy, &what, || async move {
        let count = node.get_block_count().await?;
        Ok::<_, anyhow::Error>(if count >= height {
            Probe::Ready(count)
        } else {
            Probe::Pending(format!("height {}", count))
        })
    })
    .await
}

fn describe_tips(nodes: &[Arc<dyn NodeRpc>], tips: &[TipInfo]) -> String {
    nodes
        .iter()
        .zip(tips)
        .map(|(node, tip)| format!("{}={}@{}", node.label(), tip.hash, tip.height))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Wait until every node reports the same best block and height
pub async fn wait_all_tips_equal(
    clock: &dyn Clock,
    policy: &WaitPolicy,
    nodes: &[Arc<dyn NodeRpc>],
) -> Result<TipInfo, WaitError> {
    wait_until(clock, policy, "all tips equal", || async move {
        let mut tips = Vec::with_capacity(nodes.len());
        for node in nodes {
            tips.push(node.get_tip().await?);
        }
        let Some(first) = tips.first().copied() else {
            return Ok::<_, anyhow::Error>(Probe::Ready(TipInfo {
                hash: Hash::zero(),
                height: 0,
                time: 0,
            }));
        };
        Ok::<_, anyhow::Error>(if tips.iter().all(|tip| *tip == first) {
            Probe::Ready(first)
        } else {
            Probe::Pending(describe_tips(nodes, &tips))
        })
    })
    .await
}

/// Wait until every node holds the same mempool transaction set
pub async fn wait_all_mempools_equal(
    clock: &dyn Clock,
    policy: &WaitPolicy,
    nodes: &[Arc<dyn NodeRpc>],
) -> Result<Vec<ChainView>, WaitError> {
    wait_until(clock, policy, "all mempools equal", || async move {
        let mut views = Vec::with_capacity(nodes.len());
        for node in nodes {
            views.push(ChainView::capture(node.as_ref()).await?);
        }
        let equal = views.windows(2).all(|pair| pair[0].mempool == pair[1].mempool);
        Ok::<_, anyhow::Error>(if equal {
            Probe::Ready(views)
        } else {
            Probe::Pending(
                views
                    .iter()
                    .map(|v| format!("{}: {} tx", v.label, v.mempool.len()))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })
    })
    .await
}

/// Wait until `node` does (or does not) list `peer` among its peers
pub async fn wait_for_peer_link(
    clock: &dyn Clock,
    policy: &WaitPolicy,
    node: &dyn NodeRpc,
    peer: &str,
    connected: bool,
) -> Result<(), WaitError> {
    let what = format!(
        "{} to be {} {}",
        node.label(),
        if connected { "connected to" } else { "disconnected from" },
        peer
    );
    wait_until(clock, policy, &what, || async move {
        let peers = node.get_peers().await?;
        let linked = peers.iter().any(|p| p == peer);
        Ok::<_, anyhow::Error>(if linked == connected {
            Probe::Ready(())
        } else {
            Probe::Pending(format!("peers [{}]", peers.join(", ")))
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::PausedClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_secs(5),
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(200),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_after_polls() {
        let clock = PausedClock::new();
        let polls = AtomicU32::new(0);
        let value = wait_until(&clock, &fast_policy(), "counter", || {
            let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Ok::<_, anyhow::Error>(if n >= 4 {
                    Probe::Ready(n)
                } else {
                    Probe::Pending(format!("n={n}"))
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_times_out_with_last_observation() {
        let clock = PausedClock::new();
        let start = clock.now();
        let err = wait_until(&clock, &fast_policy(), "never", || async {
            Ok::<_, anyhow::Error>(Probe::<()>::Pending("still nothing".to_string()))
        })
        .await
        .unwrap_err();

        match err {
            WaitError::Timeout {
                what,
                waited,
                last_observed,
            } => {
                assert_eq!(what, "never");
                assert!(waited >= Duration::from_secs(5));
                assert_eq!(last_observed, "still nothing");
            }
            other => panic!("unexpected error {other}"),
        }
        // The last sleep is clamped to the remaining budget
        assert!(clock.now() - start < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_error_aborts_wait() {
        let clock = PausedClock::new();
        let err = wait_until(&clock, &fast_policy(), "broken", || async {
            Err::<Probe<()>, _>(anyhow::anyhow!("connection refused"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, WaitError::Rpc { .. }));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = fast_policy();
        let mut interval = policy.initial_interval;
        for _ in 0..20 {
            interval = policy.next_interval(interval);
        }
        assert_eq!(interval, policy.max_interval);
    }
}
