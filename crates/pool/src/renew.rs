//! Session token minting and per-call scoping
//!
//! Pure helpers used by the pool when it opens or renews a session: computing
//! the expiration epoch, turning a node's `create_session` answer into a base
//! token, minting a client-side token locally, and producing the signed,
//! contextualized copy attached to a call.

use session::{PublicKey, SessionContext, SessionToken, Signer};
use transport::{CreateSessionRequest, CreateSessionResponse};
use uuid::Uuid;

use crate::error::Result;

/// Last epoch (exclusive) of a session opened at `epoch` for `duration` epochs.
pub fn expiration_for(epoch: u64, duration: u64) -> u64 {
    epoch.saturating_add(duration)
}

/// Request the node to open a session for `owner`.
pub fn create_request(owner: PublicKey, expiration: u64) -> CreateSessionRequest {
    CreateSessionRequest { expiration, owner }
}

/// Base token from the node's `create_session` answer.
pub fn server_token(
    response: &CreateSessionResponse,
    epoch: u64,
    expiration: u64,
) -> Result<SessionToken> {
    let id = Uuid::from_slice(&response.id)
        .map_err(|e| session::Error::InvalidId(e.to_string()))?;
    let key = PublicKey::decode(&response.session_key)?;
    Ok(SessionToken::new(id, key, epoch, expiration))
}

/// Base token minted locally, authenticated by the signer's own key.
pub fn client_token(signer: &dyn Signer, epoch: u64, expiration: u64) -> SessionToken {
    SessionToken::new(Uuid::new_v4(), signer.public_key(), epoch, expiration)
}

/// Signed copy of `base` scoped to `context`. The base token is untouched.
pub fn contextualize(
    base: &SessionToken,
    context: SessionContext,
    signer: &dyn Signer,
) -> Result<SessionToken> {
    let mut token = base.contextualize(context);
    token.sign(signer)?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use session::{ContainerId, DigestSigner, Verb};

    fn response(id_len: usize, key_prefix: u8) -> CreateSessionResponse {
        let mut session_key = vec![key_prefix];
        session_key.extend_from_slice(&[9; 32]);
        CreateSessionResponse {
            id: vec![1; id_len],
            session_key,
        }
    }

    #[test]
    fn expiration_saturates() {
        assert_eq!(expiration_for(10, 100), 110);
        assert_eq!(expiration_for(u64::MAX - 1, 100), u64::MAX);
    }

    #[test]
    fn server_token_uses_node_material() {
        let token = server_token(&response(16, 0x03), 7, 107).unwrap();
        assert_eq!(token.id(), Uuid::from_bytes([1; 16]));
        assert_eq!(token.auth_key().as_bytes()[0], 0x03);
        assert_eq!(token.issued_at(), 7);
        assert_eq!(token.not_before(), 7);
        assert_eq!(token.expiration(), 107);
        assert!(token.is_base());
    }

    #[test]
    fn server_token_rejects_bad_id() {
        let err = server_token(&response(15, 0x02), 1, 2).unwrap_err();
        assert!(matches!(err, Error::Session(session::Error::InvalidId(_))));
    }

    #[test]
    fn server_token_rejects_bad_key() {
        let err = server_token(&response(16, 0x04), 1, 2).unwrap_err();
        assert!(matches!(err, Error::Session(session::Error::InvalidKey(_))));
    }

    #[test]
    fn client_token_is_owned_by_signer() {
        let signer = DigestSigner::new(4);
        let a = client_token(&signer, 3, 13);
        let b = client_token(&signer, 3, 13);
        assert_eq!(a.auth_key(), &signer.public_key());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn contextualize_signs_copy() {
        let signer = DigestSigner::new(4);
        let base = client_token(&signer, 3, 13);
        let ctx = SessionContext::new(Verb::ObjectPut, ContainerId([2; 32]));
        let scoped = contextualize(&base, ctx, &signer).unwrap();

        assert!(base.signature().is_none());
        assert!(base.is_base());
        let signature = scoped.signature().unwrap();
        assert_eq!(signature.value, signer.expected_signature(&scoped.signed_data().unwrap()));
    }

    #[test]
    fn contextualize_sign_failure_is_session_error() {
        let base = client_token(&DigestSigner::new(4), 3, 13);
        let ctx = SessionContext::new(Verb::ObjectGet, ContainerId([2; 32]));
        let err = contextualize(&base, ctx, &DigestSigner::failing(4)).unwrap_err();
        assert!(matches!(err, Error::Session(session::Error::Sign(_))));
    }
}
