//! Session tokens and their per-call context
//!
//! A base token carries only identity and lifetime. `contextualize` produces
//! a private copy scoped to one verb and container (optionally to an explicit
//! object list), which is then signed by the caller. Base tokens are what the
//! cache stores; contextualized copies are built fresh for every call.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::key::PublicKey;
use crate::signer::{Signature, Signer};

/// Operation kind a contextualized token authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    ObjectPut,
    ObjectGet,
    ObjectHead,
    ObjectSearch,
    ObjectDelete,
    ObjectRange,
    ObjectRangeHash,
    ObjectPatch,
}

impl Verb {
    /// Stable numeric code used in the canonical encoding.
    pub fn code(self) -> u8 {
        match self {
            Verb::ObjectPut => 1,
            Verb::ObjectGet => 2,
            Verb::ObjectHead => 3,
            Verb::ObjectSearch => 4,
            Verb::ObjectDelete => 5,
            Verb::ObjectRange => 6,
            Verb::ObjectRangeHash => 7,
            Verb::ObjectPatch => 8,
        }
    }
}

/// Who mints the session: the node (`create_session` RPC) or the client itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    #[default]
    Server,
    Client,
}

impl SessionKind {
    pub fn label(self) -> &'static str {
        match self {
            SessionKind::Server => "server",
            SessionKind::Client => "client",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Container identifier (SHA-256 of the container structure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub [u8; 32]);

/// Object identifier within a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub [u8; 32]);

/// Call-specific scope bound onto a copy of a base token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub verb: Verb,
    pub container: ContainerId,
    /// Explicit allow-list; `None` authorizes every object in the container.
    pub objects: Option<Vec<ObjectId>>,
}

impl SessionContext {
    pub fn new(verb: Verb, container: ContainerId) -> Self {
        Self {
            verb,
            container,
            objects: None,
        }
    }

    pub fn with_objects(mut self, objects: Vec<ObjectId>) -> Self {
        self.objects = Some(objects);
        self
    }
}

/// A time-bounded session credential.
///
/// Lifetimes are expressed in network epochs. A token is valid at epoch `e`
/// when `not_before <= e`, `issued_at <= e` and `e < expiration`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    id: Uuid,
    auth_key: PublicKey,
    issued_at: u64,
    not_before: u64,
    expiration: u64,
    context: Option<SessionContext>,
    signature: Option<Signature>,
}

impl SessionToken {
    /// Build a base token issued at `epoch`, usable until `expiration`.
    pub fn new(id: Uuid, auth_key: PublicKey, epoch: u64, expiration: u64) -> Self {
        Self {
            id,
            auth_key,
            issued_at: epoch,
            not_before: epoch,
            expiration,
            context: None,
            signature: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn auth_key(&self) -> &PublicKey {
        &self.auth_key
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn not_before(&self) -> u64 {
        self.not_before
    }

    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    /// True for a token with no bound verb/container.
    pub fn is_base(&self) -> bool {
        self.context.is_none()
    }

    /// Whether the token can no longer be used at `epoch`.
    pub fn expired_at(&self, epoch: u64) -> bool {
        self.expiration <= epoch
    }

    /// Error unless the token is still usable at `epoch`.
    pub fn ensure_not_expired(&self, epoch: u64) -> Result<()> {
        if self.expired_at(epoch) {
            return Err(Error::Expired {
                expiration: self.expiration,
                epoch,
            });
        }
        Ok(())
    }

    /// Copy of this token scoped to `context`, with any previous signature dropped.
    pub fn contextualize(&self, context: SessionContext) -> Self {
        Self {
            context: Some(context),
            signature: None,
            ..self.clone()
        }
    }

    /// Sign the canonical encoding of the token with `signer`.
    pub fn sign(&mut self, signer: &dyn Signer) -> Result<()> {
        let value = signer.sign(&self.signed_data()?)?;
        self.signature = Some(Signature {
            scheme: signer.scheme(),
            key: signer.public_key(),
            value,
        });
        Ok(())
    }

    /// Canonical byte encoding covered by the signature.
    ///
    /// Layout: id (16) | key len (1) | key | iat | nbf | exp (u64 BE each) |
    /// context flag (1) [| verb (1) | container (32) | objects flag (1)
    /// [| count (u32 BE) | ids (32 each)]].
    pub fn signed_data(&self) -> Result<Vec<u8>> {
        let key = self.auth_key.as_bytes();
        let mut out = Vec::with_capacity(16 + 1 + key.len() + 24 + 1 + 34);
        out.extend_from_slice(self.id.as_bytes());
        out.push(length_prefix::<u8>(key.len(), "session key")?);
        out.extend_from_slice(key);
        out.extend_from_slice(&self.issued_at.to_be_bytes());
        out.extend_from_slice(&self.not_before.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        match &self.context {
            None => out.push(0),
            Some(ctx) => {
                out.push(1);
                out.push(ctx.verb.code());
                out.extend_from_slice(&ctx.container.0);
                match &ctx.objects {
                    None => out.push(0),
                    Some(objects) => {
                        out.push(1);
                        let count = length_prefix::<u32>(objects.len(), "object list")?;
                        out.extend_from_slice(&count.to_be_bytes());
                        for object in objects {
                            out.extend_from_slice(&object.0);
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

fn length_prefix<T: TryFrom<usize>>(len: usize, field: &str) -> Result<T> {
    T::try_from(len)
        .map_err(|_| Error::Encoding(format!("{field} length {len} overflows its prefix")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::DigestSigner;

    fn base_token(epoch: u64, expiration: u64) -> SessionToken {
        let key = DigestSigner::new(9).public_key();
        SessionToken::new(Uuid::from_bytes([1; 16]), key, epoch, expiration)
    }

    #[test]
    fn expiration_boundary_is_exclusive() {
        let token = base_token(10, 20);
        assert!(!token.expired_at(19));
        assert!(token.expired_at(20));
        assert!(token.expired_at(21));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        assert_eq!(length_prefix::<u8>(33, "session key"), Ok(33));
        let err = length_prefix::<u8>(256, "session key").unwrap_err();
        assert!(matches!(err, Error::Encoding(_)), "got {err:?}");
        assert_eq!(length_prefix::<u32>(2, "object list"), Ok(2));
    }

    #[test]
    fn ensure_not_expired_reports_epochs() {
        let err = base_token(10, 20).ensure_not_expired(25).unwrap_err();
        assert_eq!(
            err,
            Error::Expired {
                expiration: 20,
                epoch: 25
            }
        );
    }

    #[test]
    fn contextualize_leaves_base_untouched() {
        let base = base_token(1, 100);
        let ctx = SessionContext::new(Verb::ObjectPut, ContainerId([3; 32]));
        let scoped = base.contextualize(ctx.clone());

        assert!(base.is_base());
        assert_eq!(scoped.context(), Some(&ctx));
        assert_eq!(scoped.id(), base.id());
        assert_eq!(scoped.expiration(), base.expiration());
    }

    #[test]
    fn contextualize_drops_previous_signature() {
        let signer = DigestSigner::new(1);
        let mut first = base_token(1, 100)
            .contextualize(SessionContext::new(Verb::ObjectGet, ContainerId([1; 32])));
        first.sign(&signer).unwrap();

        let second = first.contextualize(SessionContext::new(Verb::ObjectHead, ContainerId([1; 32])));
        assert!(second.signature().is_none());
    }

    #[test]
    fn sign_covers_context() {
        let signer = DigestSigner::new(1);
        let base = base_token(1, 100);
        let mut put = base.contextualize(SessionContext::new(Verb::ObjectPut, ContainerId([3; 32])));
        let mut get = base.contextualize(SessionContext::new(Verb::ObjectGet, ContainerId([3; 32])));
        put.sign(&signer).unwrap();
        get.sign(&signer).unwrap();

        let put_sig = put.signature().unwrap();
        assert_eq!(put_sig.key, signer.public_key());
        assert_eq!(put_sig.value, signer.expected_signature(&put.signed_data().unwrap()));
        assert_ne!(put_sig.value, get.signature().unwrap().value);
    }

    #[test]
    fn object_allow_list_changes_encoding() {
        let base = base_token(1, 100);
        let ctx = SessionContext::new(Verb::ObjectDelete, ContainerId([3; 32]));
        let all = base.contextualize(ctx.clone());
        let none = base.contextualize(ctx.clone().with_objects(vec![]));
        let one = base.contextualize(ctx.with_objects(vec![ObjectId([5; 32])]));

        let (all, none, one) = (
            all.signed_data().unwrap(),
            none.signed_data().unwrap(),
            one.signed_data().unwrap(),
        );
        assert_ne!(all, none);
        assert_ne!(none, one);
        assert_eq!(one.len(), none.len() + 32);
    }

    #[test]
    fn failed_sign_leaves_token_unsigned() {
        let mut token = base_token(1, 100);
        assert!(token.sign(&DigestSigner::failing(1)).is_err());
        assert!(token.signature().is_none());
    }

    #[test]
    fn session_kind_labels() {
        assert_eq!(SessionKind::default(), SessionKind::Server);
        assert_eq!(SessionKind::Client.to_string(), "client");
    }
}
