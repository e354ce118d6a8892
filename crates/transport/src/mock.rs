//! Scripted in-memory transport for tests
//!
//! A `MockBuilder` hands out one `MockNode` per address. The node holds the
//! knobs (failures, delays, queued replies) and counters; every transport the
//! builder produces for that address shares it, so a test can flip a node's
//! behavior between rebalance cycles and observe redials.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::{
    BoxFuture, ClientBuilder, CreateSessionRequest, CreateSessionResponse, EndpointInfo, Request,
    Response, Transport,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Behavior and counters for one mocked node.
#[derive(Debug)]
pub struct MockNode {
    address: String,
    dial_error: Mutex<Option<TransportError>>,
    dial_delay: Mutex<Option<Duration>>,
    liveness_error: Mutex<Option<TransportError>>,
    liveness_delay: Mutex<Option<Duration>>,
    epoch: AtomicU64,
    epoch_error: Mutex<Option<TransportError>>,
    session_reply: Mutex<Option<Result<CreateSessionResponse>>>,
    session_delay: Mutex<Option<Duration>>,
    call_replies: Mutex<VecDeque<Result<Response>>>,
    call_error: Mutex<Option<TransportError>>,
    call_delay: Mutex<Option<Duration>>,
    last_request: Mutex<Option<Request>>,
    last_session_request: Mutex<Option<CreateSessionRequest>>,
    dials: AtomicUsize,
    probes: AtomicUsize,
    calls: AtomicUsize,
    sessions: AtomicUsize,
    closes: AtomicUsize,
}

impl MockNode {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            dial_error: Mutex::new(None),
            dial_delay: Mutex::new(None),
            liveness_error: Mutex::new(None),
            liveness_delay: Mutex::new(None),
            epoch: AtomicU64::new(1),
            epoch_error: Mutex::new(None),
            session_reply: Mutex::new(None),
            session_delay: Mutex::new(None),
            call_replies: Mutex::new(VecDeque::new()),
            call_error: Mutex::new(None),
            call_delay: Mutex::new(None),
            last_request: Mutex::new(None),
            last_session_request: Mutex::new(None),
            dials: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            sessions: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Make every subsequent dial fail (`None` restores success).
    pub fn set_dial_error(&self, err: Option<TransportError>) {
        *lock(&self.dial_error) = err;
    }

    pub fn set_dial_delay(&self, delay: Option<Duration>) {
        *lock(&self.dial_delay) = delay;
    }

    /// Make `endpoint_info` fail (`None` restores success).
    pub fn set_liveness_error(&self, err: Option<TransportError>) {
        *lock(&self.liveness_error) = err;
    }

    /// Delay `endpoint_info` answers, e.g. past a health check timeout.
    pub fn set_liveness_delay(&self, delay: Option<Duration>) {
        *lock(&self.liveness_delay) = delay;
    }

    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    pub fn set_epoch_error(&self, err: Option<TransportError>) {
        *lock(&self.epoch_error) = err;
    }

    /// Override what `create_session` returns. `None` restores the generated reply.
    pub fn set_session_reply(&self, reply: Option<Result<CreateSessionResponse>>) {
        *lock(&self.session_reply) = reply;
    }

    /// Delay `create_session` answers. The delay starts after the connection check.
    pub fn set_session_delay(&self, delay: Option<Duration>) {
        *lock(&self.session_delay) = delay;
    }

    /// Queue one reply for the next `call`. Queued replies win over `set_call_error`.
    pub fn push_reply(&self, reply: Result<Response>) {
        lock(&self.call_replies).push_back(reply);
    }

    /// Fail every `call` that has no queued reply (`None` restores success).
    pub fn set_call_error(&self, err: Option<TransportError>) {
        *lock(&self.call_error) = err;
    }

    pub fn set_call_delay(&self, delay: Option<Duration>) {
        *lock(&self.call_delay) = delay;
    }

    pub fn last_request(&self) -> Option<Request> {
        lock(&self.last_request).clone()
    }

    pub fn last_session_request(&self) -> Option<CreateSessionRequest> {
        lock(&self.last_session_request).clone()
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn next_session(&self) -> Result<CreateSessionResponse> {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) as u128 + 1;
        if let Some(reply) = lock(&self.session_reply).clone() {
            return reply;
        }
        let mut session_key = Vec::with_capacity(33);
        session_key.push(0x02);
        session_key.extend_from_slice(&[n as u8; 32]);
        Ok(CreateSessionResponse {
            id: n.to_be_bytes().to_vec(),
            session_key,
        })
    }

    fn next_reply(&self) -> Result<Response> {
        if let Some(reply) = lock(&self.call_replies).pop_front() {
            return reply;
        }
        match lock(&self.call_error).clone() {
            Some(err) => Err(err),
            None => Ok(Response::default()),
        }
    }
}

/// `ClientBuilder` producing `MockTransport`s backed by shared `MockNode`s.
#[derive(Debug, Default)]
pub struct MockBuilder {
    nodes: Mutex<HashMap<String, Arc<MockNode>>>,
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node state for `address`, created on first use.
    pub fn node(&self, address: &str) -> Arc<MockNode> {
        lock(&self.nodes)
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MockNode::new(address)))
            .clone()
    }
}

impl ClientBuilder for MockBuilder {
    fn build(&self, address: &str) -> Arc<dyn Transport> {
        Arc::new(MockTransport {
            node: self.node(address),
            dialed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }
}

/// One connection to a `MockNode`.
#[derive(Debug)]
pub struct MockTransport {
    node: Arc<MockNode>,
    dialed: AtomicBool,
    closed: AtomicBool,
}

impl MockTransport {
    fn ready(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if !self.dialed.load(Ordering::SeqCst) {
            return Err(TransportError::NotDialed);
        }
        Ok(())
    }
}

impl Transport for MockTransport {
    fn address(&self) -> &str {
        &self.node.address
    }

    fn dial(&self, _timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.node.dials.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.node.dial_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = lock(&self.node.dial_error).clone() {
                return Err(err);
            }
            self.dialed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn endpoint_info(&self) -> BoxFuture<'_, Result<EndpointInfo>> {
        Box::pin(async move {
            self.ready()?;
            self.node.probes.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.node.liveness_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = lock(&self.node.liveness_error).clone() {
                return Err(err);
            }
            Ok(EndpointInfo {
                public_key: vec![0x02; 33],
                version: "mock".to_string(),
            })
        })
    }

    fn network_epoch(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            self.ready()?;
            if let Some(err) = lock(&self.node.epoch_error).clone() {
                return Err(err);
            }
            Ok(self.node.epoch.load(Ordering::SeqCst))
        })
    }

    fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> BoxFuture<'_, Result<CreateSessionResponse>> {
        Box::pin(async move {
            self.ready()?;
            *lock(&self.node.last_session_request) = Some(request);
            let delay = *lock(&self.node.session_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.node.next_session()
        })
    }

    fn call(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(async move {
            self.ready()?;
            self.node.calls.fetch_add(1, Ordering::SeqCst);
            *lock(&self.node.last_request) = Some(request);
            let delay = *lock(&self.node.call_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.node.next_reply()
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.node.closes.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Method, Status};

    #[tokio::test]
    async fn calls_before_dial_fail() {
        let builder = MockBuilder::new();
        let transport = builder.build("s01:8080");
        let err = transport.network_epoch().await.unwrap_err();
        assert_eq!(err, TransportError::NotDialed);
    }

    #[tokio::test]
    async fn transports_share_node_state() {
        let builder = MockBuilder::new();
        let first = builder.build("s01:8080");
        let second = builder.build("s01:8080");
        first.dial(Duration::from_secs(1)).await.unwrap();
        second.dial(Duration::from_secs(1)).await.unwrap();

        builder.node("s01:8080").set_epoch(42);
        assert_eq!(first.network_epoch().await.unwrap(), 42);
        assert_eq!(builder.node("s01:8080").dials(), 2);
    }

    #[tokio::test]
    async fn queued_replies_come_before_sticky_error() {
        let builder = MockBuilder::new();
        let node = builder.node("s01:8080");
        let transport = builder.build("s01:8080");
        transport.dial(Duration::from_secs(1)).await.unwrap();

        node.set_call_error(Some(TransportError::Status(Status::InternalServerError)));
        node.push_reply(Ok(Response { body: b"ok".to_vec() }));

        let first = transport.call(Request::new(Method::ObjectGet, vec![])).await;
        assert_eq!(first.unwrap().body, b"ok");
        let second = transport.call(Request::new(Method::ObjectGet, vec![])).await;
        assert_eq!(
            second.unwrap_err().status(),
            Some(Status::InternalServerError)
        );
        assert_eq!(node.calls(), 2);
    }

    #[tokio::test]
    async fn closed_transport_rejects_calls() {
        let builder = MockBuilder::new();
        let transport = builder.build("s01:8080");
        transport.dial(Duration::from_secs(1)).await.unwrap();
        transport.close().await.unwrap();

        let err = transport.endpoint_info().await.unwrap_err();
        assert_eq!(err, TransportError::Closed);
        assert_eq!(builder.node("s01:8080").closes(), 1);
    }

    #[tokio::test]
    async fn generated_sessions_are_distinct() {
        let builder = MockBuilder::new();
        let transport = builder.build("s01:8080");
        transport.dial(Duration::from_secs(1)).await.unwrap();
        let owner = session::PublicKey::decode(&[0x02; 33]).unwrap();
        let request = CreateSessionRequest {
            expiration: 10,
            owner,
        };

        let a = transport.create_session(request.clone()).await.unwrap();
        let b = transport.create_session(request).await.unwrap();
        assert_eq!(a.id.len(), 16);
        assert_ne!(a.id, b.id);
        assert_eq!(builder.node("s01:8080").sessions(), 2);
    }
}
