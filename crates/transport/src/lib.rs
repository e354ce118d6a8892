//! Node transport abstraction
//!
//! One `Transport` is one connection to one storage node. The pool only ever
//! talks to nodes through this trait, and builds fresh transports through a
//! `ClientBuilder` when a node has to be redialed. Concrete wire protocols
//! (gRPC over TLS or plain TCP) plug in by implementing both traits.
//!
//! Every operation returns `Err(TransportError::Status(..))` when the node
//! answers with a non-OK status, so callers can classify failures without
//! looking into response bodies.

pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod status;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use session::{PublicKey, SessionToken};

pub use error::{Result, TransportError};
pub use status::Status;

/// Boxed future returned by `Transport` methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// RPC a request is addressed to. Also used as the statistics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    BalanceGet,
    ContainerPut,
    ContainerGet,
    ContainerList,
    ContainerDelete,
    ContainerEacl,
    ContainerSetEacl,
    EndpointInfo,
    NetworkInfo,
    NetMapSnapshot,
    ObjectPut,
    ObjectDelete,
    ObjectGet,
    ObjectHead,
    ObjectRange,
    ObjectSearch,
    SessionCreate,
    ApeManagerAddChain,
    ApeManagerRemoveChain,
    ApeManagerListChains,
    /// Connection establishment; only ever recorded as an error.
    Dial,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::BalanceGet => "balance_get",
            Method::ContainerPut => "container_put",
            Method::ContainerGet => "container_get",
            Method::ContainerList => "container_list",
            Method::ContainerDelete => "container_delete",
            Method::ContainerEacl => "container_eacl",
            Method::ContainerSetEacl => "container_set_eacl",
            Method::EndpointInfo => "endpoint_info",
            Method::NetworkInfo => "network_info",
            Method::NetMapSnapshot => "netmap_snapshot",
            Method::ObjectPut => "object_put",
            Method::ObjectDelete => "object_delete",
            Method::ObjectGet => "object_get",
            Method::ObjectHead => "object_head",
            Method::ObjectRange => "object_range",
            Method::ObjectSearch => "object_search",
            Method::SessionCreate => "session_create",
            Method::ApeManagerAddChain => "ape_manager_add_chain",
            Method::ApeManagerRemoveChain => "ape_manager_remove_chain",
            Method::ApeManagerListChains => "ape_manager_list_chains",
            Method::Dial => "dial",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opaque request addressed to one RPC.
///
/// The body is already encoded by the caller; the transport only attaches the
/// session token (if any) and ships it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub session: Option<SessionToken>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn new(method: Method, body: impl Into<Vec<u8>>) -> Self {
        Self {
            method,
            session: None,
            body: body.into(),
        }
    }

    pub fn with_session(mut self, session: SessionToken) -> Self {
        self.session = Some(session);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub body: Vec<u8>,
}

/// Liveness probe answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub public_key: Vec<u8>,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionRequest {
    /// Last epoch (exclusive) the session stays valid.
    pub expiration: u64,
    pub owner: PublicKey,
}

/// Raw session material as returned by the node. Decoded by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSessionResponse {
    pub id: Vec<u8>,
    pub session_key: Vec<u8>,
}

/// A connection to one storage node.
pub trait Transport: Send + Sync {
    /// Network address this transport talks to.
    fn address(&self) -> &str;

    /// Establish the connection, giving up after `timeout`.
    fn dial(&self, timeout: Duration) -> BoxFuture<'_, Result<()>>;

    fn endpoint_info(&self) -> BoxFuture<'_, Result<EndpointInfo>>;

    /// Current network epoch as seen by the node.
    fn network_epoch(&self) -> BoxFuture<'_, Result<u64>>;

    fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> BoxFuture<'_, Result<CreateSessionResponse>>;

    fn call(&self, request: Request) -> BoxFuture<'_, Result<Response>>;

    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Builds undialed transports for an address.
pub trait ClientBuilder: Send + Sync {
    fn build(&self, address: &str) -> Arc<dyn Transport>;
}
