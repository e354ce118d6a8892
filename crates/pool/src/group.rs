//! Priority groups and weighted node selection
//!
//! All nodes sharing one priority form a group. The group's sampler is built
//! from the members' configured weights with unhealthy members zeroed, then
//! normalized. It is never changed in place: the rebalancer builds a new one
//! and swaps the `Arc`.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::sampler::Sampler;

/// Draws per member before a group gives up.
const ATTEMPTS_PER_MEMBER: usize = 3;

/// Normalize weights to sum to 1. All zeros stay all zeros.
pub fn adjust_weights(weights: &[f64]) -> Vec<f64> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; weights.len()];
    }
    weights.iter().map(|w| w / sum).collect()
}

/// Nodes of one priority with their current sampler.
pub struct Group {
    priority: i32,
    nodes: Vec<Arc<Node>>,
    sampler: RwLock<Arc<Sampler>>,
}

impl Group {
    pub fn new(priority: i32, nodes: Vec<Arc<Node>>) -> Self {
        let sampler = Sampler::from_entropy(&healthy_probabilities(&nodes));
        Self {
            priority,
            nodes,
            sampler: RwLock::new(Arc::new(sampler)),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Pick a healthy member.
    ///
    /// A single-member group returns that member if it is healthy, regardless
    /// of weight. Larger groups draw from the sampler up to three times per
    /// member and return the first healthy draw.
    pub fn connection(&self) -> Result<Arc<Node>> {
        if let [only] = self.nodes.as_slice() {
            if only.is_healthy() {
                return Ok(only.clone());
            }
            return Err(Error::NoHealthyClient);
        }

        let sampler = self.sampler();
        for _ in 0..ATTEMPTS_PER_MEMBER * self.nodes.len() {
            let Some(index) = sampler.next() else {
                break;
            };
            let node = &self.nodes[index];
            if node.is_healthy() {
                return Ok(node.clone());
            }
        }

        debug!(priority = self.priority, "no healthy node drawn from group");
        Err(Error::NoHealthyClient)
    }

    /// Rebuild and swap the sampler from current member health.
    pub fn rebuild_sampler(&self) {
        let probabilities = healthy_probabilities(&self.nodes);
        debug!(priority = self.priority, ?probabilities, "swapping group sampler");
        self.set_sampler(Sampler::from_entropy(&probabilities));
    }

    pub(crate) fn set_sampler(&self, sampler: Sampler) {
        *self
            .sampler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(sampler);
    }

    /// Count of healthy members.
    pub fn healthy(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_healthy()).count()
    }

    fn sampler(&self) -> Arc<Sampler> {
        self.sampler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

fn healthy_probabilities(nodes: &[Arc<Node>]) -> Vec<f64> {
    let weights: Vec<f64> = nodes
        .iter()
        .map(|n| if n.is_healthy() { n.weight() } else { 0.0 })
        .collect();
    adjust_weights(&weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeParam;
    use session::SessionCache;
    use std::time::Duration;
    use transport::mock::MockBuilder;

    fn nodes(builder: &Arc<MockBuilder>, params: &[(&str, f64)]) -> Vec<Arc<Node>> {
        let cache = Arc::new(SessionCache::new(10, 100));
        params
            .iter()
            .map(|(address, weight)| {
                Arc::new(Node::new(
                    NodeParam::new(*address, 1, *weight),
                    builder.clone(),
                    cache.clone(),
                    Duration::from_secs(1),
                    10,
                ))
            })
            .collect()
    }

    #[test]
    fn adjust_weights_normalizes() {
        assert_eq!(adjust_weights(&[1.0, 3.0]), vec![0.25, 0.75]);
        assert_eq!(adjust_weights(&[0.0, 0.0]), vec![0.0, 0.0]);
        let sum: f64 = adjust_weights(&[0.2, 0.5, 7.0]).iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_member_returned_iff_healthy() {
        let builder = Arc::new(MockBuilder::new());
        let group = Group::new(1, nodes(&builder, &[("s01:8080", 0.0001)]));
        assert_eq!(group.connection().unwrap().address(), "s01:8080");

        group.nodes()[0].mark_unhealthy();
        assert!(matches!(group.connection(), Err(Error::NoHealthyClient)));
    }

    #[test]
    fn unhealthy_member_is_skipped_after_rebuild() {
        let builder = Arc::new(MockBuilder::new());
        let group = Group::new(1, nodes(&builder, &[("a", 0.9), ("b", 0.1)]));
        group.nodes()[0].mark_unhealthy();
        group.rebuild_sampler();

        for _ in 0..1_000 {
            assert_eq!(group.connection().unwrap().address(), "b");
        }
    }

    #[test]
    fn stale_sampler_still_never_returns_unhealthy() {
        let builder = Arc::new(MockBuilder::new());
        let group = Group::new(1, nodes(&builder, &[("a", 0.5), ("b", 0.5)]));
        group.set_sampler(Sampler::with_seed(&[0.5, 0.5], 11));
        group.nodes()[0].mark_unhealthy();

        for _ in 0..1_000 {
            match group.connection() {
                Ok(node) => assert_eq!(node.address(), "b"),
                Err(e) => assert!(matches!(e, Error::NoHealthyClient)),
            }
        }
    }

    #[test]
    fn all_unhealthy_group_fails() {
        let builder = Arc::new(MockBuilder::new());
        let group = Group::new(1, nodes(&builder, &[("a", 1.0), ("b", 1.0)]));
        for node in group.nodes() {
            node.mark_unhealthy();
        }
        group.rebuild_sampler();
        assert!(matches!(group.connection(), Err(Error::NoHealthyClient)));
        assert_eq!(group.healthy(), 0);
    }
}
