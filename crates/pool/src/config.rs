//! Pool configuration types and loading
//!
//! `PoolConfig` deserializes from TOML. Durations are given in milliseconds
//! (`*_ms` keys) and exposed as `Duration` through accessors. The statistics
//! callback cannot come from a file; set it on the struct after loading.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use session::SessionKind;

use crate::error::{Error, Result};
use crate::stats::StatisticCallback;

/// One node the pool should connect to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeParam {
    pub address: String,
    /// Lower values are tried first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Relative share of traffic within the priority group.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl NodeParam {
    pub fn new(address: impl Into<String>, priority: i32, weight: f64) -> Self {
        Self {
            address: address.into(),
            priority,
            weight,
        }
    }
}

/// Pool settings
#[derive(Clone, Deserialize)]
pub struct PoolConfig {
    pub nodes: Vec<NodeParam>,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,
    #[serde(default = "default_rebalance_interval_ms")]
    pub rebalance_interval_ms: u64,
    /// Lifetime of new sessions, in network epochs.
    #[serde(default = "default_session_duration")]
    pub session_duration: u64,
    /// Health-affecting errors tolerated before a node is marked unhealthy.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_session_cache_capacity")]
    pub session_cache_capacity: usize,
    #[serde(default)]
    pub session_kind: SessionKind,
    /// Count status codes this client does not recognize as node failures.
    #[serde(default)]
    pub count_unknown_statuses: bool,
    #[serde(skip)]
    pub statistic_callback: Option<StatisticCallback>,
}

fn default_priority() -> i32 {
    1
}

fn default_weight() -> f64 {
    1.0
}

fn default_dial_timeout_ms() -> u64 {
    5_000
}

fn default_stream_timeout_ms() -> u64 {
    10_000
}

fn default_health_check_timeout_ms() -> u64 {
    4_000
}

fn default_rebalance_interval_ms() -> u64 {
    15_000
}

fn default_session_duration() -> u64 {
    100
}

fn default_error_threshold() -> u32 {
    100
}

fn default_session_cache_capacity() -> usize {
    session::DEFAULT_CAPACITY
}

impl PoolConfig {
    /// Configuration for `nodes` with every other setting at its default.
    pub fn new(nodes: Vec<NodeParam>) -> Self {
        Self {
            nodes,
            dial_timeout_ms: default_dial_timeout_ms(),
            stream_timeout_ms: default_stream_timeout_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            rebalance_interval_ms: default_rebalance_interval_ms(),
            session_duration: default_session_duration(),
            error_threshold: default_error_threshold(),
            session_cache_capacity: default_session_cache_capacity(),
            session_kind: SessionKind::default(),
            count_unknown_statuses: false,
            statistic_callback: None,
        }
    }

    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PoolConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check node list and numeric settings.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Config("no nodes configured".into()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.address.trim().is_empty() {
                return Err(Error::Config("node address must not be empty".into()));
            }
            if !node.weight.is_finite() || node.weight <= 0.0 {
                return Err(Error::Config(format!(
                    "weight of node {} must be a positive number, got {}",
                    node.address, node.weight
                )));
            }
            if !seen.insert(node.address.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate node address: {}",
                    node.address
                )));
            }
        }

        let non_zero = [
            ("dial_timeout_ms", self.dial_timeout_ms),
            ("stream_timeout_ms", self.stream_timeout_ms),
            ("health_check_timeout_ms", self.health_check_timeout_ms),
            ("rebalance_interval_ms", self.rebalance_interval_ms),
            ("session_duration", self.session_duration),
            ("error_threshold", u64::from(self.error_threshold)),
            ("session_cache_capacity", self.session_cache_capacity as u64),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than 0")));
            }
        }

        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_millis(self.rebalance_interval_ms)
    }

    /// Nodes bucketed by priority, lowest priority first. Configuration
    /// order is kept within a bucket.
    pub fn group_nodes(&self) -> Vec<(i32, Vec<NodeParam>)> {
        let mut groups: BTreeMap<i32, Vec<NodeParam>> = BTreeMap::new();
        for node in &self.nodes {
            groups.entry(node.priority).or_default().push(node.clone());
        }
        groups.into_iter().collect()
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("nodes", &self.nodes)
            .field("dial_timeout_ms", &self.dial_timeout_ms)
            .field("stream_timeout_ms", &self.stream_timeout_ms)
            .field("health_check_timeout_ms", &self.health_check_timeout_ms)
            .field("rebalance_interval_ms", &self.rebalance_interval_ms)
            .field("session_duration", &self.session_duration)
            .field("error_threshold", &self.error_threshold)
            .field("session_cache_capacity", &self.session_cache_capacity)
            .field("session_kind", &self.session_kind)
            .field("count_unknown_statuses", &self.count_unknown_statuses)
            .field("statistic_callback", &self.statistic_callback.is_some())
            .finish()
    }
}
