//! Pool orchestration: dialing, selection, calls and sessions
//!
//! The pool holds priority groups built once from configuration. Selection
//! walks groups in ascending priority and asks each for a healthy member.
//! Every call goes through one path that times it, records statistics, feeds
//! the node's health monitor, and evicts sessions the node no longer knows.
//!
//! Lifecycle:
//! 1. `Pool::new` validates configuration and builds undialed nodes
//! 2. `dial` connects every node concurrently and opens a session on each
//! 3. A background rebalancer probes nodes and swaps group samplers
//! 4. `close` stops the rebalancer and closes every connection

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use session::{SessionCache, SessionContext, SessionKind, SessionToken, Signer, cache_key};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use transport::{ClientBuilder, Method, Request, Response, TransportError};

use crate::classify::classify;
use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::group::Group;
use crate::node::Node;
use crate::rebalance::spawn_rebalancer;
use crate::renew;
use crate::stats::{NodeStatistic, Statistic, StatsCollector};

/// Zero elapsed time marks an error-only record in the collector.
const MIN_ELAPSED: Duration = Duration::from_nanos(1);

/// Lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    Closed,
}

impl PoolState {
    pub fn label(self) -> &'static str {
        match self {
            PoolState::Created => "created",
            PoolState::Running => "running",
            PoolState::Closed => "closed",
        }
    }
}

/// Which session, if any, a call carries.
#[derive(Debug, Clone, Default)]
pub enum SessionMode {
    /// Sessionless call.
    #[default]
    None,
    /// Attach this token unchanged.
    Caller(SessionToken),
    /// Use the pool-managed session for the signer, scoped to this context.
    Default(SessionContext),
}

/// Per-call options.
#[derive(Clone, Default)]
pub struct CallParams {
    pub session: SessionMode,
    /// Overrides the pool's default signer for session scoping.
    pub signer: Option<Arc<dyn Signer>>,
}

impl CallParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, context: SessionContext) -> Self {
        self.session = SessionMode::Default(context);
        self
    }

    pub fn with_token(mut self, token: SessionToken) -> Self {
        self.session = SessionMode::Caller(token);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }
}

/// State shared with background tasks.
pub(crate) struct PoolInner {
    pub(crate) groups: Vec<Group>,
    pub(crate) config: PoolConfig,
    signer: Arc<dyn Signer>,
    cache: Arc<SessionCache>,
    stats: StatsCollector,
}

impl PoolInner {
    fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.groups.iter().flat_map(|g| g.nodes().iter())
    }

    /// Run one node operation under the stream timeout, then account for it.
    async fn observe<T, F>(&self, node: &Node, method: Method, operation: F) -> Result<T>
    where
        F: Future<Output = transport::Result<T>>,
    {
        let timeout = self.config.stream_timeout();
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        let elapsed = start.elapsed().max(MIN_ELAPSED);

        self.stats
            .record(node.address(), method, elapsed, result.as_ref().err());

        result.map_err(|e| {
            if classify(&e, self.config.count_unknown_statuses).is_health_affecting()
                && node.record_failure()
            {
                self.rebuild_group_of(node);
            }
            Error::transport(node.address(), e)
        })
    }

    /// Drop a node that just went unhealthy from its group's sampler.
    fn rebuild_group_of(&self, node: &Node) {
        if let Some(group) = self.groups.iter().find(|g| g.priority() == node.priority()) {
            group.rebuild_sampler();
        }
    }

    /// Open a new base session on `node` for `signer` and cache it.
    async fn open_session(&self, node: &Node, signer: &dyn Signer) -> Result<SessionToken> {
        let transport = node.transport().await;
        let epoch = self
            .observe(node, Method::NetworkInfo, transport.network_epoch())
            .await?;
        let expiration = renew::expiration_for(epoch, self.config.session_duration);

        let token = match self.config.session_kind {
            SessionKind::Server => {
                let request = renew::create_request(signer.public_key(), expiration);
                let response = self
                    .observe(node, Method::SessionCreate, transport.create_session(request))
                    .await?;
                renew::server_token(&response, epoch, expiration)?
            }
            SessionKind::Client => renew::client_token(signer, epoch, expiration),
        };

        self.cache.update_epoch(epoch);
        // A restart in the meantime purged the node; keep its cache clean
        if !node.is_healthy() || !Arc::ptr_eq(&transport, &node.transport().await) {
            debug!(address = %node.address(), "node restarted while opening session, not caching");
            return Ok(token);
        }
        let identity = signer.public_key();
        let key = cache_key(node.address(), self.config.session_kind, &identity);
        self.cache.put(key, token.clone());
        if identity == self.signer.public_key() {
            node.set_held_session(token.clone());
        }

        debug!(
            address = %node.address(),
            kind = %self.config.session_kind,
            epoch,
            expiration,
            "opened session"
        );
        Ok(token)
    }

    /// Dial one node and open the default session. Returns whether it ended healthy.
    async fn dial_node(&self, node: &Node) -> bool {
        if let Err(e) = node.dial().await {
            if let Error::Transport { source, .. } = &e {
                self.stats
                    .record(node.address(), Method::Dial, Duration::ZERO, Some(source));
            }
            return false;
        }

        match self.open_session(node, self.signer.as_ref()).await {
            Ok(_) => node.is_healthy(),
            Err(e) => {
                warn!(address = %node.address(), error = %e, "initial session failed, node unhealthy");
                node.mark_unhealthy();
                false
            }
        }
    }
}

/// Client-side pool of storage node connections.
///
/// Dropping the pool stops the rebalancer on its next wakeup; `close` also
/// waits for it and closes node connections.
pub struct Pool {
    inner: Arc<PoolInner>,
    state: Mutex<PoolState>,
    shutdown: watch::Sender<bool>,
    rebalancer: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Pool {
    /// Validate `config` and build undialed nodes.
    ///
    /// `signer` is the default identity used for pool-managed sessions.
    pub fn new(
        config: PoolConfig,
        builder: Arc<dyn ClientBuilder>,
        signer: Arc<dyn Signer>,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(SessionCache::new(
            config.session_cache_capacity,
            config.session_duration,
        ));
        let groups: Vec<Group> = config
            .group_nodes()
            .into_iter()
            .map(|(priority, params)| {
                let nodes = params
                    .into_iter()
                    .map(|param| {
                        Arc::new(Node::new(
                            param,
                            builder.clone(),
                            cache.clone(),
                            config.dial_timeout(),
                            u64::from(config.error_threshold),
                        ))
                    })
                    .collect();
                Group::new(priority, nodes)
            })
            .collect();

        info!(
            nodes = config.nodes.len(),
            groups = groups.len(),
            "pool initialized"
        );

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(PoolInner {
                groups,
                stats: StatsCollector::new(config.statistic_callback.clone()),
                config,
                signer,
                cache,
            }),
            state: Mutex::new(PoolState::Created),
            shutdown,
            rebalancer: tokio::sync::Mutex::new(None),
        })
    }

    /// Connect every node and open the initial sessions.
    ///
    /// Nodes that fail stay in their group as unhealthy for the rebalancer to
    /// retry. Fails with `NoHealthyNodes` (and closes the pool) if none
    /// became healthy, or with `Closed` if `close` ran while dialing.
    pub async fn dial(&self) -> Result<()> {
        {
            let mut state = self.lock_state();
            match *state {
                PoolState::Created => *state = PoolState::Running,
                PoolState::Running => return Err(Error::AlreadyDialed),
                PoolState::Closed => return Err(Error::Closed),
            }
        }

        let mut dials = JoinSet::new();
        for node in self.inner.nodes() {
            let inner = self.inner.clone();
            let node = node.clone();
            dials.spawn(async move { inner.dial_node(&node).await });
        }

        let mut healthy = 0usize;
        while let Some(joined) = dials.join_next().await {
            match joined {
                Ok(true) => healthy += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "node dial task failed"),
            }
        }

        if healthy == 0 {
            warn!("no node became healthy, closing pool");
            *self.lock_state() = PoolState::Closed;
            for node in self.inner.nodes() {
                node.close().await;
            }
            return Err(Error::NoHealthyNodes);
        }

        for group in &self.inner.groups {
            group.rebuild_sampler();
        }

        // Held across the state check so a concurrent `close` waits for the handle
        let mut rebalancer = self.rebalancer.lock().await;
        let handle = {
            let state = self.lock_state();
            if *state == PoolState::Closed {
                None
            } else {
                Some(spawn_rebalancer(
                    self.inner.clone(),
                    self.inner.config.rebalance_interval(),
                    self.shutdown.subscribe(),
                ))
            }
        };
        match handle {
            Some(handle) => *rebalancer = Some(handle),
            None => {
                drop(rebalancer);
                warn!("pool closed while dialing");
                for node in self.inner.nodes() {
                    node.close().await;
                }
                return Err(Error::Closed);
            }
        }

        info!(
            healthy,
            total = self.inner.nodes().count(),
            "pool dialed"
        );
        Ok(())
    }

    /// Stop the rebalancer and close every node connection. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.lock_state();
            if *state == PoolState::Closed {
                return;
            }
            *state = PoolState::Closed;
        }

        let _ = self.shutdown.send(true);
        let handle = self.rebalancer.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "rebalancer task failed");
            }
        }

        for node in self.inner.nodes() {
            node.close().await;
        }
        info!("pool closed");
    }

    /// A healthy node, trying groups in ascending priority.
    pub fn connection(&self) -> Result<Arc<Node>> {
        self.ensure_running()?;
        for group in &self.inner.groups {
            if let Ok(node) = group.connection() {
                return Ok(node);
            }
        }
        Err(Error::NoHealthyClient)
    }

    /// Send one request to a healthy node.
    ///
    /// With `SessionMode::Default` the cached base session for the signer on
    /// that node is used (opened if missing or stale), scoped to the given
    /// context and signed. Session-not-found/expired answers evict that
    /// session; the error is returned, not retried. A caller token that has
    /// already expired at the last known epoch fails without reaching the node.
    pub async fn call(&self, mut request: Request, params: CallParams) -> Result<Response> {
        let node = self.connection()?;

        let mut session_key = None;
        match params.session {
            SessionMode::None => {}
            SessionMode::Caller(token) => {
                token.ensure_not_expired(self.inner.cache.epoch())?;
                request.session = Some(token);
            }
            SessionMode::Default(context) => {
                let signer = params.signer.unwrap_or_else(|| self.inner.signer.clone());
                let key = cache_key(
                    node.address(),
                    self.inner.config.session_kind,
                    &signer.public_key(),
                );
                let base = match self.inner.cache.get(&key) {
                    Some(token) => token,
                    None => self.inner.open_session(&node, signer.as_ref()).await?,
                };
                request.session = Some(renew::contextualize(&base, context, signer.as_ref())?);
                session_key = Some(key);
            }
        }

        let transport = node.transport().await;
        let method = request.method;
        let result = self
            .inner
            .observe(&node, method, transport.call(request))
            .await;

        if let (Err(e), Some(key)) = (&result, session_key) {
            if e.is_session_error() {
                self.inner.cache.delete(&key);
                node.clear_held_session();
                debug!(address = %node.address(), key = %key, "evicted rejected session");
            }
        }

        result
    }

    /// Current network epoch from a healthy node.
    pub async fn network_epoch(&self) -> Result<u64> {
        let node = self.connection()?;
        let transport = node.transport().await;
        let epoch = self
            .inner
            .observe(&node, Method::NetworkInfo, transport.network_epoch())
            .await?;
        self.inner.cache.update_epoch(epoch);
        Ok(epoch)
    }

    /// Snapshot of per-node counters.
    pub fn statistic(&self) -> Statistic {
        let mut statistic = Statistic::default();
        for node in self.inner.nodes() {
            let monitor = node.monitor();
            let overall_errors = monitor.overall_errors();
            statistic.overall_errors += overall_errors;
            statistic.nodes.push(NodeStatistic {
                address: node.address().to_string(),
                current_errors: monitor.current_errors(),
                overall_errors,
                request_errors: self.inner.stats.errors(node.address()),
                methods: self.inner.stats.methods(node.address()),
            });
        }
        statistic
    }

    /// Pool health summary.
    ///
    /// Status mapping: all nodes healthy → healthy, some → degraded,
    /// none → unhealthy.
    pub fn health(&self) -> serde_json::Value {
        let mut nodes = Vec::new();
        let mut healthy = 0usize;
        for group in &self.inner.groups {
            for node in group.nodes() {
                if node.is_healthy() {
                    healthy += 1;
                }
                nodes.push(serde_json::json!({
                    "address": node.address(),
                    "priority": group.priority(),
                    "weight": node.weight(),
                    "status": node.status().label(),
                    "current_errors": node.monitor().current_errors(),
                    "overall_errors": node.monitor().overall_errors(),
                }));
            }
        }

        let total = nodes.len();
        let status = if healthy == total && total > 0 {
            "healthy"
        } else if healthy > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "state": self.state().label(),
            "nodes_total": total,
            "nodes_healthy": healthy,
            "sessions_cached": self.inner.cache.len(),
            "epoch": self.inner.cache.epoch(),
            "nodes": nodes
        })
    }

    pub fn state(&self) -> PoolState {
        *self.lock_state()
    }

    pub fn groups(&self) -> &[Group] {
        &self.inner.groups
    }

    /// Shared session cache.
    pub fn session_cache(&self) -> &Arc<SessionCache> {
        &self.inner.cache
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            PoolState::Running => Ok(()),
            PoolState::Created => Err(Error::NotDialed),
            PoolState::Closed => Err(Error::Closed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
