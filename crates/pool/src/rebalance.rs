//! Background health checks and sampler rebalancing
//!
//! Spawns a periodic task that restarts every node (probe if healthy, redial
//! if not) and rebuilds the sampler of each group where some node's health
//! changed. Groups are checked concurrently, and so are the nodes within a
//! group; a cycle ends only when every check has finished or timed out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::node::Node;
use crate::pool::PoolInner;

/// Spawn the rebalancer.
///
/// Runs every `interval` until `shutdown` flips to `true` or its sender is
/// dropped. Returns a `JoinHandle` for the spawned task.
pub(crate) fn spawn_rebalancer(
    inner: Arc<PoolInner>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // One cycle after a slow sweep, not one per missed tick
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick, nodes were just dialed
        ticker.tick().await;
        info!(interval_ms = interval.as_millis() as u64, "rebalancer started");

        loop {
            tokio::select! {
                _ = ticker.tick() => rebalance_cycle(&inner).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("rebalancer stopped");
    })
}

/// Run one rebalance cycle across all groups.
pub(crate) async fn rebalance_cycle(inner: &Arc<PoolInner>) {
    let mut groups = JoinSet::new();
    for index in 0..inner.groups.len() {
        let inner = inner.clone();
        groups.spawn(async move { rebalance_group(&inner, index).await });
    }

    while let Some(joined) = groups.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "group rebalance task failed");
        }
    }
}

async fn rebalance_group(inner: &PoolInner, index: usize) {
    let group = &inner.groups[index];
    let timeout = inner.config.health_check_timeout();

    let mut checks = JoinSet::new();
    for node in group.nodes() {
        let node = node.clone();
        checks.spawn(async move { check_node(&node, timeout).await });
    }

    let mut changed = false;
    while let Some(joined) = checks.join_next().await {
        match joined {
            Ok(node_changed) => changed |= node_changed,
            Err(e) => warn!(error = %e, "node health check task failed"),
        }
    }

    if changed {
        debug!(priority = group.priority(), healthy = group.healthy(), "group health changed");
        group.rebuild_sampler();
    }
}

/// Restart one node under `timeout`. Returns whether its health changed.
async fn check_node(node: &Node, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, node.restart()).await {
        Ok(outcome) => {
            if let Err(e) = &outcome.result {
                warn!(address = %node.address(), error = %e, "health check failed");
                node.purge_sessions();
            }
            outcome.changed
        }
        Err(_) => {
            warn!(
                address = %node.address(),
                timeout_ms = timeout.as_millis() as u64,
                "health check timed out"
            );
            node.mark_unhealthy()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeParam;
    use session::SessionCache;
    use transport::TransportError;
    use transport::mock::MockBuilder;

    fn node(builder: &Arc<MockBuilder>, address: &str) -> Node {
        Node::new(
            NodeParam::new(address, 1, 1.0),
            builder.clone(),
            Arc::new(SessionCache::new(10, 100)),
            Duration::from_secs(1),
            10,
        )
    }

    #[tokio::test]
    async fn check_healthy_node_is_unchanged() {
        let builder = Arc::new(MockBuilder::new());
        let node = node(&builder, "a");
        node.dial().await.unwrap();
        assert!(!check_node(&node, Duration::from_secs(1)).await);
        assert!(node.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probe_times_out_and_marks_unhealthy() {
        let builder = Arc::new(MockBuilder::new());
        let node = node(&builder, "a");
        node.dial().await.unwrap();
        builder.node("a").set_liveness_delay(Some(Duration::from_secs(10)));

        assert!(check_node(&node, Duration::from_secs(1)).await);
        assert!(!node.is_healthy());
    }

    #[tokio::test]
    async fn failed_redial_stays_unhealthy_without_change() {
        let builder = Arc::new(MockBuilder::new());
        let node = node(&builder, "a");
        node.dial().await.unwrap();
        node.mark_unhealthy();
        builder
            .node("a")
            .set_dial_error(Some(TransportError::Dial("refused".into())));

        assert!(!check_node(&node, Duration::from_secs(1)).await);
        assert!(!node.is_healthy());
    }
}
