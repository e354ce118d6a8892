//! Signing capability used to authorize session tokens
//!
//! The pool never owns key material. It is handed an `Arc<dyn Signer>` at
//! construction (the default identity) and optionally a different signer per
//! call; both sign the contextualized copy of a session token.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::key::PublicKey;

/// Signature algorithm reported by a signer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    EcdsaSha512,
    EcdsaRfc6979Sha256,
    EcdsaRfc6979Sha256WalletConnect,
}

/// Produces signatures on behalf of one identity.
pub trait Signer: Send + Sync {
    /// Sign `data`, returning the raw signature bytes.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Public half of the signing key; identifies the session owner.
    fn public_key(&self) -> PublicKey;

    fn scheme(&self) -> SignatureScheme;
}

/// A signature attached to a session token.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    pub scheme: SignatureScheme,
    pub key: PublicKey,
    pub value: Vec<u8>,
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("scheme", &self.scheme)
            .field("key", &self.key)
            .field("len", &self.value.len())
            .finish()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use digest::DigestSigner;

#[cfg(any(test, feature = "test-util"))]
mod digest {
    use sha2::{Digest, Sha256};

    use super::{SignatureScheme, Signer};
    use crate::error::{Error, Result};
    use crate::key::PublicKey;

    /// Deterministic keyed-digest signer for tests.
    ///
    /// `signature = SHA256(seed || data)`. Not a real signature scheme: it only
    /// gives tests a stable identity and verifiable output.
    #[derive(Debug, Clone)]
    pub struct DigestSigner {
        seed: [u8; 32],
        fail: bool,
    }

    impl DigestSigner {
        pub fn new(seed: u8) -> Self {
            Self {
                seed: [seed; 32],
                fail: false,
            }
        }

        /// A signer whose `sign` always errors.
        pub fn failing(seed: u8) -> Self {
            Self {
                seed: [seed; 32],
                fail: true,
            }
        }

        /// Recompute the signature for `data`, for assertions.
        pub fn expected_signature(&self, data: &[u8]) -> Vec<u8> {
            let mut hasher = Sha256::new();
            hasher.update(self.seed);
            hasher.update(data);
            hasher.finalize().to_vec()
        }
    }

    impl Signer for DigestSigner {
        fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
            if self.fail {
                return Err(Error::Sign("signer unavailable".into()));
            }
            Ok(self.expected_signature(data))
        }

        fn public_key(&self) -> PublicKey {
            let mut bytes = Vec::with_capacity(33);
            bytes.push(0x02);
            bytes.extend_from_slice(&Sha256::digest(self.seed));
            PublicKey::decode(&bytes).expect("0x02 prefix plus 32-byte digest is a valid key")
        }

        fn scheme(&self) -> SignatureScheme {
            SignatureScheme::EcdsaRfc6979Sha256
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_signer_is_deterministic() {
        let a = DigestSigner::new(1);
        let b = DigestSigner::new(1);
        assert_eq!(a.sign(b"payload").unwrap(), b.sign(b"payload").unwrap());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn distinct_seeds_are_distinct_identities() {
        assert_ne!(
            DigestSigner::new(1).public_key(),
            DigestSigner::new(2).public_key()
        );
    }

    #[test]
    fn failing_signer_errors() {
        let err = DigestSigner::failing(1).sign(b"x").unwrap_err();
        assert!(matches!(err, crate::Error::Sign(_)));
    }
}
