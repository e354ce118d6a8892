//! Client-side connection pool for redundant storage nodes
//!
//! Spreads calls over priority-ranked groups of nodes with weighted random
//! selection, tracks per-node health from call outcomes, recovers failed
//! nodes in the background, and keeps signed session tokens cached so calls
//! do not renegotiate a session every time.
//!
//! Node lifecycle:
//! 1. `Pool::dial` connects every node and opens a session on each
//! 2. `Pool::connection` draws a healthy node from the first usable group
//! 3. Health-affecting failures count toward the node's error threshold
//! 4. At the threshold the node goes unhealthy and its sessions are purged
//! 5. The rebalancer redials it; success puts it back into the sampler

pub mod classify;
pub mod config;
pub mod error;
pub mod group;
pub mod node;
pub mod pool;
mod rebalance;
pub mod renew;
pub mod sampler;
pub mod stats;

pub use classify::{ErrorClass, classify, classify_status};
pub use config::{NodeParam, PoolConfig};
pub use error::{Error, Result};
pub use group::{Group, adjust_weights};
pub use node::{HealthMonitor, HealthStatus, Node, RestartOutcome};
pub use pool::{CallParams, Pool, PoolState, SessionMode};
pub use sampler::Sampler;
pub use stats::{
    MethodSnapshot, NodeStatistic, RequestInfo, Statistic, StatisticCallback, StatsCollector,
};
