//! Content encryption: the fixed set of AEAD algorithms a sender may choose per message.
//!
//! Output layout is `nonce (12 bytes) || ciphertext || tag`. The caller supplies
//! associated data that binds the ciphertext to its envelope header.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Result, SrcprotectError};

/// Nonce length shared by every supported algorithm.
pub const NONCE_LEN: usize = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SymmetricAlgorithm {
    Aes128Gcm,
    #[default]
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl SymmetricAlgorithm {
    pub const ALL: [SymmetricAlgorithm; 3] = [
        SymmetricAlgorithm::Aes128Gcm,
        SymmetricAlgorithm::Aes256Gcm,
        SymmetricAlgorithm::ChaCha20Poly1305,
    ];

    /// Wire identifier recorded in the sealed envelope header.
    pub fn id(self) -> u8 {
        match self {
            Self::Aes128Gcm => 0x01,
            Self::Aes256Gcm => 0x02,
            Self::ChaCha20Poly1305 => 0x03,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.id() == id)
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Aes128Gcm => "aes128-gcm",
            Self::Aes256Gcm => "aes256-gcm",
            Self::ChaCha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Fresh random one-time content key of the right size.
    pub fn generate_key(self) -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(vec![0u8; self.key_len()]);
        rand::thread_rng().fill_bytes(&mut key);
        key
    }
}

impl fmt::Display for SymmetricAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SymmetricAlgorithm {
    type Err = SrcprotectError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|alg| alg.name() == wanted)
            .ok_or_else(|| {
                SrcprotectError::InvalidInput(format!(
                    "unsupported algorithm '{}' (choose one of: aes128-gcm, aes256-gcm, chacha20-poly1305)",
                    s
                ))
            })
    }
}

fn seal_with<C: Aead + KeyInit>(key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|_| SrcprotectError::CryptoOperationFailure(format!("invalid content key length {}", key.len())))?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::<C>::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("encryption failed: {}", e)))?;

    let mut output = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

fn open_with<C: Aead + KeyInit>(key: &[u8], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(SrcprotectError::DecryptionFailure("ciphertext too short".into()));
    }
    let cipher = C::new_from_slice(key)
        .map_err(|_| SrcprotectError::DecryptionFailure("content key has the wrong size".into()))?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| SrcprotectError::DecryptionFailure("ciphertext failed authentication".into()))
}

/// Encrypt `plaintext` under `key`, binding `aad`.
pub fn encrypt(algorithm: SymmetricAlgorithm, key: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if key.len() != algorithm.key_len() {
        return Err(SrcprotectError::CryptoOperationFailure(format!(
            "{} needs a {}-byte key, got {}",
            algorithm,
            algorithm.key_len(),
            key.len()
        )));
    }
    match algorithm {
        SymmetricAlgorithm::Aes128Gcm => seal_with::<Aes128Gcm>(key, aad, plaintext),
        SymmetricAlgorithm::Aes256Gcm => seal_with::<Aes256Gcm>(key, aad, plaintext),
        SymmetricAlgorithm::ChaCha20Poly1305 => seal_with::<ChaCha20Poly1305>(key, aad, plaintext),
    }
}

/// Decrypt and authenticate; any mismatch is a `DecryptionFailure`.
pub fn decrypt(algorithm: SymmetricAlgorithm, key: &[u8], aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        SymmetricAlgorithm::Aes128Gcm => open_with::<Aes128Gcm>(key, aad, sealed),
        SymmetricAlgorithm::Aes256Gcm => open_with::<Aes256Gcm>(key, aad, sealed),
        SymmetricAlgorithm::ChaCha20Poly1305 => open_with::<ChaCha20Poly1305>(key, aad, sealed),
    }
}
