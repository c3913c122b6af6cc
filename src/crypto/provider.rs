//! Pluggable cryptographic capability used by the CA and the envelope code.
//!
//! Keys cross this boundary as raw bytes wrapped in `KeyPair`/`PublicKey`, so
//! callers never name a concrete signature or key-transport library.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::cert::{Certificate, CertificateBody};
use crate::crypto::symmetric::{self, SymmetricAlgorithm};
use crate::error::{Result, SrcprotectError};
use crate::keys::{codec, KeyPair, PublicKey};

pub trait CryptoProvider: Send + Sync {
    /// Identifier recorded in every certificate's `key_algorithm` field.
    fn key_algorithm(&self) -> &'static str;

    fn generate_key_pair(&self) -> KeyPair;

    /// Rebuild a key pair from its private half (as decoded from disk).
    fn key_pair_from_private(&self, private: &[u8]) -> Result<KeyPair>;

    fn sign(&self, signer: &KeyPair, message: &[u8]) -> Result<Vec<u8>>;

    /// `SignatureInvalid` unless `signature` is valid for `message` under `public_key`.
    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<()>;

    fn encrypt_symmetric(
        &self,
        algorithm: SymmetricAlgorithm,
        key: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>> {
        symmetric::encrypt(algorithm, key, aad, plaintext)
    }

    fn decrypt_symmetric(
        &self,
        algorithm: SymmetricAlgorithm,
        key: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>> {
        symmetric::decrypt(algorithm, key, aad, ciphertext)
    }

    /// Key transport: encrypt a content key so only `recipient`'s private key recovers it.
    fn wrap_key(&self, recipient: &PublicKey, content_key: &[u8]) -> Result<Vec<u8>>;

    fn unwrap_key(&self, recipient: &KeyPair, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>>;

    /// Sign the canonical encoding of `body` with the issuer key.
    fn build_certificate(&self, body: CertificateBody, issuer: &KeyPair) -> Result<Certificate> {
        let canonical = body
            .canonical_json()
            .map_err(|e| SrcprotectError::CertificateBuildFailure(e.to_string()))?;
        let signature = self
            .sign(issuer, canonical.as_bytes())
            .map_err(|e| SrcprotectError::CertificateBuildFailure(e.to_string()))?;
        Ok(Certificate::from_parts(body, signature))
    }

    fn parse_certificate(&self, text: &str) -> Result<Certificate> {
        codec::decode_certificate(text)
    }
}

/// Ed25519 signatures, X25519 (age) key transport, AEAD content encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardProvider;

impl StandardProvider {
    fn seed(key_pair: &KeyPair) -> Result<Zeroizing<[u8; 32]>> {
        let seed: [u8; 32] = key_pair
            .private_bytes()
            .try_into()
            .map_err(|_| SrcprotectError::CryptoOperationFailure("Ed25519 private key must be 32 bytes".into()))?;
        Ok(Zeroizing::new(seed))
    }

    fn public_array(public_key: &PublicKey) -> Result<[u8; 32]> {
        public_key
            .as_bytes()
            .try_into()
            .map_err(|_| SrcprotectError::CryptoOperationFailure("Ed25519 public key must be 32 bytes".into()))
    }
}

impl CryptoProvider for StandardProvider {
    fn key_algorithm(&self) -> &'static str {
        "ed25519"
    }

    fn generate_key_pair(&self) -> KeyPair {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(seed.as_mut());
        let signing_key = SigningKey::from_bytes(&seed);
        KeyPair::new(
            PublicKey::from_bytes(signing_key.verifying_key().to_bytes().to_vec()),
            Zeroizing::new(seed.to_vec()),
        )
    }

    fn key_pair_from_private(&self, private: &[u8]) -> Result<KeyPair> {
        let seed: [u8; 32] = private
            .try_into()
            .map_err(|_| SrcprotectError::CryptoOperationFailure("Ed25519 private key must be 32 bytes".into()))?;
        let seed = Zeroizing::new(seed);
        let signing_key = SigningKey::from_bytes(&seed);
        Ok(KeyPair::new(
            PublicKey::from_bytes(signing_key.verifying_key().to_bytes().to_vec()),
            Zeroizing::new(seed.to_vec()),
        ))
    }

    fn sign(&self, signer: &KeyPair, message: &[u8]) -> Result<Vec<u8>> {
        let signing_key = SigningKey::from_bytes(&*Self::seed(signer)?);
        Ok(signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(&self, public_key: &PublicKey, message: &[u8], signature: &[u8]) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(&Self::public_array(public_key)?)
            .map_err(|e| SrcprotectError::SignatureInvalid(format!("unusable public key: {}", e)))?;
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| SrcprotectError::SignatureInvalid("signature must be exactly 64 bytes".into()))?;
        verifying_key
            .verify_strict(message, &signature)
            .map_err(|e| SrcprotectError::SignatureInvalid(e.to_string()))
    }

    fn wrap_key(&self, recipient: &PublicKey, content_key: &[u8]) -> Result<Vec<u8>> {
        let x25519_public = super::ed25519_to_x25519_public(&Self::public_array(recipient)?)?;
        let age_recipient = super::age_recipient(&x25519_public)?;
        super::age_encrypt(content_key, &age_recipient)
    }

    fn unwrap_key(&self, recipient: &KeyPair, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let x25519_secret = super::ed25519_to_x25519_secret(&*Self::seed(recipient)?);
        let identity = super::age_identity(&x25519_secret)?;
        super::age_decrypt(wrapped, &identity)
    }
}
