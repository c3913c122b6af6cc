//! Asymmetric key material and its on-disk representation.

pub mod codec;
pub mod fingerprint;
pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Raw public key bytes, serialized as base64.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(#[serde(with = "codec::base64_bytes")] Vec<u8>);

impl PublicKey {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", fingerprint::short_fingerprint(self))
    }
}

/// A public key together with its private half.
///
/// The private bytes are zeroed on drop and never appear in `Debug` output.
/// Only the encrypted form produced by `codec::encode_private_key` may be
/// written to disk.
#[derive(Clone)]
pub struct KeyPair {
    public: PublicKey,
    private: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    pub fn new(public: PublicKey, private: Zeroizing<Vec<u8>>) -> Self {
        Self { public, private }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn private_bytes(&self) -> &[u8] {
        &self.private
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("private", &"<redacted>")
            .finish()
    }
}
