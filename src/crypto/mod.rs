//! Crypto module: Ed25519-to-X25519 key mapping, age key transport, and the
//! passphrase-protected private key envelope.
//!
//! Key boundaries are always raw [u8; 32] bytes so that the Ed25519 types of
//! ed25519-dalek and the X25519 types used inside age never meet directly.

pub mod provider;
pub mod symmetric;

use argon2::{Algorithm, Argon2, Params, Version};
use bech32::{ToBase32, Variant};
use hkdf::Hkdf;
use rand::Rng;
use sha2::Sha256;
use std::io::Write;
use zeroize::Zeroizing;

use crate::error::{Result, SrcprotectError};

// ── SRCPKENV binary key envelope constants ──────────────────────────────────

/// Magic header bytes identifying the private key envelope format.
const ENVELOPE_MAGIC: &[u8; 8] = b"SRCPKENV";

/// Current version byte for the key envelope format.
const ENVELOPE_VERSION: u8 = 0x01;

/// Fixed header length: 8 magic + 1 version + 4 m_cost + 4 t_cost + 4 p_cost + 32 salt = 53 bytes.
const ENVELOPE_HEADER_LEN: usize = 53;

/// HKDF info string for key envelope derivation.
const KEY_HKDF_INFO: &[u8] = b"srcprotect-key-v1";

/// Argon2id cost parameters. Written into every key envelope header, so a
/// file stays decodable after the defaults change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    /// 64 MiB memory, 3 iterations, single lane.
    fn default() -> Self {
        Self {
            m_cost: 65536,
            t_cost: 3,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    pub(crate) fn argon2(&self) -> Result<Argon2<'static>> {
        let params = Params::new(self.m_cost, self.t_cost, self.p_cost, Some(32))
            .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("argon2 params error: {}", e)))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Derive the X25519 secret scalar from an Ed25519 seed.
///
/// Uses SHA-512(seed)[0..32] via ed25519-dalek's `to_scalar_bytes()`, which is
/// the static secret scalar matching `ed25519_to_x25519_public`.
pub fn ed25519_to_x25519_secret(seed: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let signing_key = ed25519_dalek::SigningKey::from_bytes(seed);
    Zeroizing::new(signing_key.to_scalar_bytes())
}

/// Derive the X25519 public Montgomery point from an Ed25519 public key.
pub fn ed25519_to_x25519_public(public_key: &[u8; 32]) -> Result<[u8; 32]> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(public_key)
        .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("invalid Ed25519 public key: {}", e)))?;
    Ok(verifying_key.to_montgomery().to_bytes())
}

/// Construct an age X25519 Identity from derived secret scalar bytes.
///
/// Bech32-encodes the scalar with the "age-secret-key-" HRP as required by
/// the age x25519 format, then parses the string into an Identity.
pub fn age_identity(x25519_secret: &[u8; 32]) -> Result<age::x25519::Identity> {
    let encoded = Zeroizing::new(
        bech32::encode("age-secret-key-", x25519_secret.to_base32(), Variant::Bech32)
            .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("bech32 encode error: {}", e)))?,
    );
    // age parses the identity case-insensitively; uppercase is the canonical form
    encoded
        .to_ascii_uppercase()
        .parse()
        .map_err(|e: &str| SrcprotectError::CryptoOperationFailure(format!("invalid age identity: {}", e)))
}

/// Construct an age X25519 Recipient from derived public key bytes.
pub fn age_recipient(x25519_pubkey: &[u8; 32]) -> Result<age::x25519::Recipient> {
    let encoded = bech32::encode("age", x25519_pubkey.to_base32(), Variant::Bech32)
        .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("bech32 encode error: {}", e)))?;
    encoded
        .parse()
        .map_err(|e: &str| SrcprotectError::CryptoOperationFailure(format!("invalid age recipient: {}", e)))
}

/// Encrypt plaintext with an age X25519 Recipient.
///
/// Returns the full age ciphertext including the header with the ephemeral
/// public key. The complete blob must be passed intact to `age_decrypt`.
pub fn age_encrypt(plaintext: &[u8], recipient: &age::x25519::Recipient) -> Result<Vec<u8>> {
    let crypto_err = |e: String| SrcprotectError::CryptoOperationFailure(format!("age encrypt error: {}", e));
    let encryptor =
        age::Encryptor::with_recipients(std::iter::once(recipient as &dyn age::Recipient))
            .map_err(|e| crypto_err(e.to_string()))?;
    let mut ciphertext = vec![];
    let mut writer = encryptor
        .wrap_output(&mut ciphertext)
        .map_err(|e| crypto_err(e.to_string()))?;
    writer.write_all(plaintext).map_err(|e| crypto_err(e.to_string()))?;
    writer.finish().map_err(|e| crypto_err(e.to_string()))?;
    Ok(ciphertext)
}

/// Decrypt age ciphertext with an age X25519 Identity.
///
/// Returns `DecryptionFailure` if the identity does not match or the
/// ciphertext is malformed.
pub fn age_decrypt(ciphertext: &[u8], identity: &age::x25519::Identity) -> Result<Zeroizing<Vec<u8>>> {
    let decryptor = age::Decryptor::new(ciphertext)
        .map_err(|e| SrcprotectError::DecryptionFailure(format!("age decryptor error: {}", e)))?;
    let mut reader = decryptor
        .decrypt(std::iter::once(identity as &dyn age::Identity))
        .map_err(|e| SrcprotectError::DecryptionFailure(format!("age decrypt error: {}", e)))?;
    let mut plaintext = Zeroizing::new(vec![]);
    std::io::Read::read_to_end(&mut reader, &mut plaintext)
        .map_err(|e| SrcprotectError::DecryptionFailure(format!("age stream error: {}", e)))?;
    Ok(plaintext)
}

// ── SRCPKENV binary envelope functions ──────────────────────────────────────

/// Derive a 32-byte key-encryption key from a passphrase and salt using
/// Argon2id + HKDF-SHA256.
///
/// Takes the cost parameters explicitly so that `decrypt_key_envelope` can
/// pass the values decoded from the envelope header.
fn key_derive_key(passphrase: &str, salt: &[u8; 32], params: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let argon2 = params.argon2()?;

    let mut argon2_output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, argon2_output.as_mut())
        .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("argon2 hash error: {}", e)))?;

    let hkdf = Hkdf::<Sha256>::new(None, &*argon2_output);
    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf.expand(KEY_HKDF_INFO, okm.as_mut())
        .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("hkdf expand error: {}", e)))?;

    Ok(okm)
}

/// Encrypt a 32-byte private key seed into a self-describing binary envelope.
///
/// ```text
/// Offset  Size  Field
/// 0       8     Magic: b"SRCPKENV"
/// 8       1     Version: 0x01
/// 9       4     m_cost (Argon2, u32 big-endian)
/// 13      4     t_cost (Argon2, u32 big-endian)
/// 17      4     p_cost (Argon2, u32 big-endian)
/// 21      32    Salt (random bytes)
/// 53      N     Age ciphertext (variable length)
/// ```
pub fn encrypt_key_envelope(seed: &[u8; 32], passphrase: &str, params: &KdfParams) -> Result<Vec<u8>> {
    let salt: [u8; 32] = rand::thread_rng().gen();

    let kek = key_derive_key(passphrase, &salt, params)?;
    let identity = age_identity(&kek)?;
    let recipient = identity.to_public();

    let ciphertext = age_encrypt(seed, &recipient)?;

    let mut envelope = Vec::with_capacity(ENVELOPE_HEADER_LEN + ciphertext.len());
    envelope.extend_from_slice(ENVELOPE_MAGIC);
    envelope.push(ENVELOPE_VERSION);
    envelope.extend_from_slice(&params.m_cost.to_be_bytes());
    envelope.extend_from_slice(&params.t_cost.to_be_bytes());
    envelope.extend_from_slice(&params.p_cost.to_be_bytes());
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&ciphertext);

    Ok(envelope)
}

fn be_u32(bytes: &[u8]) -> Result<u32> {
    let array: [u8; 4] = bytes
        .try_into()
        .map_err(|_| SrcprotectError::InvalidInput("truncated key envelope header".into()))?;
    Ok(u32::from_be_bytes(array))
}

/// Decrypt a key envelope back to the original 32-byte seed.
///
/// The Argon2 parameters come from the envelope header, not from the current
/// defaults. A header that is not a key envelope is `InvalidInput`; a wrong
/// passphrase or damaged ciphertext is `DecryptionFailure`.
pub fn decrypt_key_envelope(envelope: &[u8], passphrase: &str) -> Result<Zeroizing<[u8; 32]>> {
    if envelope.len() < ENVELOPE_HEADER_LEN {
        return Err(SrcprotectError::InvalidInput(format!(
            "invalid key envelope: too short ({} bytes, need {})",
            envelope.len(),
            ENVELOPE_HEADER_LEN
        )));
    }
    if &envelope[..8] != ENVELOPE_MAGIC {
        return Err(SrcprotectError::InvalidInput(
            "invalid key envelope: wrong magic bytes".into(),
        ));
    }
    if envelope[8] != ENVELOPE_VERSION {
        return Err(SrcprotectError::InvalidInput(format!(
            "unsupported key envelope version: {}",
            envelope[8]
        )));
    }

    let params = KdfParams {
        m_cost: be_u32(&envelope[9..13])?,
        t_cost: be_u32(&envelope[13..17])?,
        p_cost: be_u32(&envelope[17..21])?,
    };
    let mut salt = [0u8; 32];
    salt.copy_from_slice(&envelope[21..ENVELOPE_HEADER_LEN]);

    let ciphertext = &envelope[ENVELOPE_HEADER_LEN..];

    let kek = key_derive_key(passphrase, &salt, &params)?;
    let identity = age_identity(&kek)?;

    let plaintext = age_decrypt(ciphertext, &identity)
        .map_err(|_| SrcprotectError::DecryptionFailure("wrong passphrase or corrupted key envelope".into()))?;

    if plaintext.len() != 32 {
        return Err(SrcprotectError::InvalidInput(format!(
            "decrypted key envelope has wrong size: {} bytes (expected 32)",
            plaintext.len()
        )));
    }

    let mut seed = Zeroizing::new([0u8; 32]);
    seed.copy_from_slice(&plaintext);
    Ok(seed)
}

#[cfg(test)]
pub(crate) fn test_kdf() -> KdfParams {
    KdfParams {
        m_cost: 256,
        t_cost: 1,
        p_cost: 1,
    }
}
