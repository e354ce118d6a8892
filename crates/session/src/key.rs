//! Session authentication keys
//!
//! Nodes return the session key as a compressed secp256r1 point. Only the
//! encoding is validated here; curve arithmetic belongs to the signer.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Error, Result};

/// Length of a compressed elliptic curve point.
pub const COMPRESSED_KEY_LEN: usize = 33;

/// A public key in compressed point encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Decode and validate a compressed public key.
    ///
    /// Accepts exactly 33 bytes with a `0x02` or `0x03` parity prefix.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != COMPRESSED_KEY_LEN {
            return Err(Error::InvalidKey(format!(
                "expected {COMPRESSED_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        match bytes[0] {
            0x02 | 0x03 => Ok(Self(bytes.to_vec())),
            prefix => Err(Error::InvalidKey(format!(
                "unexpected point prefix 0x{prefix:02x}"
            ))),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Base64 form used in cache keys and logs.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl AsRef<[u8]> for PublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}
