//! Node connection wrapper and health state
//!
//! A `Node` owns one transport to one address plus the health bookkeeping for
//! it. Health transitions:
//! - Healthy → UnhealthyOnRequest (error threshold reached, or liveness probe failed)
//! - Healthy → UnhealthyOnDial (initial dial failed)
//! - Unhealthy* → Healthy (only through `restart`: fresh dial + liveness probe)
//!
//! Every status write resets the current error counter, including a
//! successful redial of a node that was already healthy. The overall counter
//! only grows.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use session::{SessionCache, SessionToken, node_prefix};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use transport::{ClientBuilder, Transport, TransportError};

use crate::config::NodeParam;
use crate::error::{Error, Result};

/// Health of a node, as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HealthStatus {
    Healthy = 0,
    /// Connection exists but the node misbehaved.
    UnhealthyOnRequest = 1,
    /// The connection was never established.
    UnhealthyOnDial = 2,
}

impl HealthStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => HealthStatus::Healthy,
            1 => HealthStatus::UnhealthyOnRequest,
            _ => HealthStatus::UnhealthyOnDial,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::UnhealthyOnRequest => "unhealthy_on_request",
            HealthStatus::UnhealthyOnDial => "unhealthy_on_dial",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    current: u64,
    overall: u64,
}

/// Error-threshold health tracking for one node.
#[derive(Debug)]
pub struct HealthMonitor {
    status: AtomicU8,
    counters: Mutex<Counters>,
    threshold: u64,
}

impl HealthMonitor {
    pub fn new(threshold: u64) -> Self {
        Self {
            status: AtomicU8::new(HealthStatus::Healthy as u8),
            counters: Mutex::new(Counters::default()),
            threshold: threshold.max(1),
        }
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// Whether the current connection was dialed successfully.
    pub fn is_dialed(&self) -> bool {
        self.status() != HealthStatus::UnhealthyOnDial
    }

    pub fn set_healthy(&self) {
        self.transition(HealthStatus::Healthy);
    }

    pub fn set_unhealthy(&self) {
        self.transition(HealthStatus::UnhealthyOnRequest);
    }

    pub fn set_unhealthy_on_dial(&self) {
        self.transition(HealthStatus::UnhealthyOnDial);
    }

    /// Count one health-affecting error.
    ///
    /// Returns `true` when this error flipped a healthy node to unhealthy.
    pub fn inc_error_rate(&self) -> bool {
        let mut counters = self.lock();
        counters.current += 1;
        counters.overall += 1;
        if counters.current < self.threshold {
            return false;
        }

        counters.current = 0;
        let previous = self
            .status
            .swap(HealthStatus::UnhealthyOnRequest as u8, Ordering::AcqRel);
        HealthStatus::from_u8(previous) == HealthStatus::Healthy
    }

    pub fn current_errors(&self) -> u64 {
        self.lock().current
    }

    pub fn overall_errors(&self) -> u64 {
        self.lock().overall
    }

    fn transition(&self, to: HealthStatus) {
        let mut counters = self.lock();
        self.status.store(to as u8, Ordering::Release);
        counters.current = 0;
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| {
            tracing::error!("health counter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Result of one `Node::restart`.
#[derive(Debug)]
pub struct RestartOutcome {
    /// Health flipped in either direction.
    pub changed: bool,
    pub result: Result<()>,
}

/// One storage node: its connection, health and held session.
pub struct Node {
    param: NodeParam,
    monitor: HealthMonitor,
    transport: RwLock<Arc<dyn Transport>>,
    builder: Arc<dyn ClientBuilder>,
    cache: Arc<SessionCache>,
    held_session: Mutex<Option<SessionToken>>,
    dial_timeout: Duration,
}

impl Node {
    /// Wrap an undialed transport for `param`.
    pub fn new(
        param: NodeParam,
        builder: Arc<dyn ClientBuilder>,
        cache: Arc<SessionCache>,
        dial_timeout: Duration,
        error_threshold: u64,
    ) -> Self {
        let transport = builder.build(&param.address);
        Self {
            param,
            monitor: HealthMonitor::new(error_threshold),
            transport: RwLock::new(transport),
            builder,
            cache,
            held_session: Mutex::new(None),
            dial_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.param.address
    }

    pub fn priority(&self) -> i32 {
        self.param.priority
    }

    pub fn weight(&self) -> f64 {
        self.param.weight
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn is_healthy(&self) -> bool {
        self.monitor.is_healthy()
    }

    pub fn status(&self) -> HealthStatus {
        self.monitor.status()
    }

    /// Current connection. Callers keep the `Arc` for the duration of one call.
    pub async fn transport(&self) -> Arc<dyn Transport> {
        self.transport.read().await.clone()
    }

    /// Establish the initial connection.
    pub async fn dial(&self) -> Result<()> {
        let transport = self.transport().await;
        match dial_with_timeout(transport.as_ref(), self.dial_timeout).await {
            Ok(()) => {
                self.monitor.set_healthy();
                debug!(address = %self.address(), "node dialed");
                Ok(())
            }
            Err(e) => {
                self.monitor.set_unhealthy_on_dial();
                warn!(address = %self.address(), error = %e, "node dial failed");
                Err(Error::transport(self.address(), e))
            }
        }
    }

    /// Count a health-affecting error. Purges the node's sessions when the
    /// error pushed it over the threshold.
    pub fn record_failure(&self) -> bool {
        let flipped = self.monitor.inc_error_rate();
        if flipped {
            warn!(
                address = %self.address(),
                overall_errors = self.monitor.overall_errors(),
                "error threshold reached, node marked unhealthy"
            );
            self.purge_sessions();
        }
        flipped
    }

    /// Mark unhealthy without counting an error. Returns `true` if the node was healthy.
    pub fn mark_unhealthy(&self) -> bool {
        let was_healthy = self.monitor.is_healthy();
        if was_healthy {
            self.monitor.set_unhealthy();
        }
        self.purge_sessions();
        was_healthy
    }

    /// Probe a healthy node, or redial an unhealthy one.
    ///
    /// A healthy node whose probe succeeds is left alone. Otherwise the old
    /// connection is closed (if it was ever dialed), the node's cached
    /// sessions are dropped, and a fresh transport is dialed and probed.
    pub async fn restart(&self) -> RestartOutcome {
        let was_healthy = self.monitor.is_healthy();
        if was_healthy {
            let transport = self.transport().await;
            match transport.endpoint_info().await {
                Ok(_) => {
                    return RestartOutcome {
                        changed: false,
                        result: Ok(()),
                    };
                }
                Err(e) => {
                    warn!(address = %self.address(), error = %e, "liveness probe failed, redialing");
                    // Out of selection before its connection goes away
                    self.monitor.set_unhealthy();
                }
            }
        }

        self.purge_sessions();

        if self.monitor.is_dialed() {
            let old = self.transport().await;
            if let Err(e) = old.close().await {
                debug!(address = %self.address(), error = %e, "closing stale connection failed");
            }
        }

        let fresh = self.builder.build(self.address());
        if let Err(e) = dial_with_timeout(fresh.as_ref(), self.dial_timeout).await {
            self.monitor.set_unhealthy_on_dial();
            return RestartOutcome {
                changed: was_healthy,
                result: Err(Error::transport(self.address(), e)),
            };
        }

        *self.transport.write().await = fresh.clone();

        if let Err(e) = fresh.endpoint_info().await {
            self.monitor.set_unhealthy();
            return RestartOutcome {
                changed: was_healthy,
                result: Err(Error::transport(self.address(), e)),
            };
        }

        self.monitor.set_healthy();
        if !was_healthy {
            info!(address = %self.address(), "node recovered");
        }
        RestartOutcome {
            changed: !was_healthy,
            result: Ok(()),
        }
    }

    pub async fn close(&self) {
        let transport = self.transport().await;
        if let Err(e) = transport.close().await {
            debug!(address = %self.address(), error = %e, "close failed");
        }
    }

    /// Most recently renewed base session for the default identity.
    pub fn held_session(&self) -> Option<SessionToken> {
        self.lock_session().clone()
    }

    pub fn set_held_session(&self, token: SessionToken) {
        *self.lock_session() = Some(token);
    }

    pub fn clear_held_session(&self) {
        self.lock_session().take();
    }

    /// Drop every cached session for this node and the held one.
    pub fn purge_sessions(&self) {
        let removed = self.cache.delete_by_prefix(&node_prefix(self.address()));
        self.clear_held_session();
        if removed > 0 {
            debug!(address = %self.address(), removed, "purged node sessions");
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<SessionToken>> {
        self.held_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn dial_with_timeout(
    transport: &dyn Transport,
    timeout: Duration,
) -> std::result::Result<(), TransportError> {
    match tokio::time::timeout(timeout, transport.dial(timeout)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}
