//! Session credentials for storage node calls
//!
//! A session token lets a client issue many operations against one node
//! without a per-call handshake. The node mints a *base* token (id, auth key,
//! lifetime in network epochs); before each call the client binds the call's
//! verb and container onto a private copy and signs that copy.
//!
//! Token flow:
//! 1. Pool asks a node for a new session (`create_session` RPC)
//! 2. Base token stored in `cache::SessionCache` under endpoint + identity
//! 3. Per call: `SessionToken::contextualize()` + `SessionToken::sign()`
//! 4. Node reports "session not found/expired" → entry evicted, renewed lazily
//!
//! Signing itself is an injected capability (`signer::Signer`); this crate
//! never touches private key material.

pub mod cache;
pub mod error;
pub mod key;
pub mod signer;
pub mod token;

pub use cache::{DEFAULT_CAPACITY, SessionCache, cache_key, node_prefix};
pub use error::{Error, Result};
pub use key::PublicKey;
#[cfg(any(test, feature = "test-util"))]
pub use signer::DigestSigner;
pub use signer::{Signature, SignatureScheme, Signer};
pub use token::{ContainerId, ObjectId, SessionContext, SessionKind, SessionToken, Verb};
