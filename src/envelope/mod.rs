//! Sign-then-encrypt envelope.
//!
//! Outbound: sign the payload with the sender key, attach the sender
//! certificate, encrypt the resulting `SignedEnvelope` under a one-time
//! content key, and wrap that key to the recipient.
//!
//! Inbound: unwrap and decrypt, bind the embedded signer to the expected
//! sender by common name and public key, then verify the signature.
//!
//! Wire format of a `SealedEnvelope`:
//!
//! ```text
//! magic "SRCPSEAL" (8) | version (1) | algorithm id (1) | key length u32 BE (4)
//! | wrapped content key | nonce (12) || AEAD ciphertext of the signed envelope
//! ```
//!
//! Everything up to and including the wrapped key is authenticated as AAD.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cert::{Certificate, KeyUsage};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::symmetric::SymmetricAlgorithm;
use crate::error::{Result, SrcprotectError};
use crate::keys::{codec, fingerprint, KeyPair};

const SEALED_MAGIC: &[u8; 8] = b"SRCPSEAL";
const SEALED_VERSION: u8 = 0x01;
const SEALED_PREFIX_LEN: usize = 8 + 1 + 1 + 4;

/// Payload, its signature, and the certificate of the signer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    #[serde(with = "codec::base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(with = "codec::base64_bytes")]
    pub signature: Vec<u8>,
    pub signer: Certificate,
}

impl SignedEnvelope {
    pub fn sign<P: CryptoProvider>(
        provider: &P,
        payload: &[u8],
        signer_key: &KeyPair,
        signer_cert: &Certificate,
    ) -> Result<Self> {
        if signer_key.public() != signer_cert.public_key() {
            return Err(SrcprotectError::CryptoOperationFailure(
                "sender key does not belong to the sender certificate".into(),
            ));
        }
        if !signer_cert.permits(KeyUsage::DigitalSignature) {
            return Err(SrcprotectError::CryptoOperationFailure(format!(
                "certificate for '{}' does not permit digital signatures",
                signer_cert.common_name()
            )));
        }
        let signature = provider.sign(signer_key, payload)?;
        Ok(Self {
            payload: payload.to_vec(),
            signature,
            signer: signer_cert.clone(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("cannot encode signed envelope: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SrcprotectError::DecryptionFailure(format!("malformed signed envelope: {}", e)))
    }

    /// Verify the signature with the embedded signer certificate's key.
    pub fn verify<P: CryptoProvider>(&self, provider: &P) -> Result<()> {
        provider.verify(self.signer.public_key(), &self.payload, &self.signature)
    }
}

/// The transmitted artifact. Self-describing: the algorithm travels with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    pub algorithm: SymmetricAlgorithm,
    pub encrypted_key: Vec<u8>,
    pub encrypted_body: Vec<u8>,
}

impl SealedEnvelope {
    /// Header bytes authenticated alongside the body.
    fn header(algorithm: SymmetricAlgorithm, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        let key_len = u32::try_from(encrypted_key.len())
            .map_err(|_| SrcprotectError::CryptoOperationFailure("wrapped key too large".into()))?;
        let mut header = Vec::with_capacity(SEALED_PREFIX_LEN + encrypted_key.len());
        header.extend_from_slice(SEALED_MAGIC);
        header.push(SEALED_VERSION);
        header.push(algorithm.id());
        header.extend_from_slice(&key_len.to_be_bytes());
        header.extend_from_slice(encrypted_key);
        Ok(header)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Self::header(self.algorithm, &self.encrypted_key)?;
        out.extend_from_slice(&self.encrypted_body);
        Ok(out)
    }

    /// Parse the wire format. Any structural problem is a `DecryptionFailure`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let malformed = |what: &str| SrcprotectError::DecryptionFailure(format!("malformed envelope: {}", what));

        if bytes.len() < SEALED_PREFIX_LEN {
            return Err(malformed("too short"));
        }
        if &bytes[..8] != SEALED_MAGIC {
            return Err(malformed("bad magic"));
        }
        if bytes[8] != SEALED_VERSION {
            return Err(malformed(&format!("unsupported version {}", bytes[8])));
        }
        let algorithm = SymmetricAlgorithm::from_id(bytes[9]).ok_or_else(|| malformed("unknown algorithm"))?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[10..14]);
        let key_len = u32::from_be_bytes(len_bytes) as usize;
        let rest = &bytes[SEALED_PREFIX_LEN..];
        if rest.len() < key_len {
            return Err(malformed("truncated wrapped key"));
        }
        let (encrypted_key, encrypted_body) = rest.split_at(key_len);
        Ok(Self {
            algorithm,
            encrypted_key: encrypted_key.to_vec(),
            encrypted_body: encrypted_body.to_vec(),
        })
    }
}

/// Sign `payload` as the sender and encrypt it for the recipient.
///
/// Every failure is reported as `EnvelopeSealFailure` carrying its cause.
pub fn seal<P: CryptoProvider>(
    provider: &P,
    payload: &[u8],
    sender_key: &KeyPair,
    sender_cert: &Certificate,
    recipient_cert: &Certificate,
    algorithm: SymmetricAlgorithm,
) -> Result<SealedEnvelope> {
    seal_inner(provider, payload, sender_key, sender_cert, recipient_cert, algorithm)
        .map_err(|e| SrcprotectError::EnvelopeSealFailure(Box::new(e)))
}

fn seal_inner<P: CryptoProvider>(
    provider: &P,
    payload: &[u8],
    sender_key: &KeyPair,
    sender_cert: &Certificate,
    recipient_cert: &Certificate,
    algorithm: SymmetricAlgorithm,
) -> Result<SealedEnvelope> {
    if !recipient_cert.permits(KeyUsage::KeyEncipherment) {
        return Err(SrcprotectError::CryptoOperationFailure(format!(
            "certificate for '{}' does not permit key encipherment",
            recipient_cert.common_name()
        )));
    }
    let signed = SignedEnvelope::sign(provider, payload, sender_key, sender_cert)?.to_bytes()?;

    let content_key = algorithm.generate_key();
    let encrypted_key = provider.wrap_key(recipient_cert.public_key(), &content_key)?;
    let aad = SealedEnvelope::header(algorithm, &encrypted_key)?;
    let encrypted_body = provider.encrypt_symmetric(algorithm, &content_key, &aad, &signed)?;

    debug!(
        sender = sender_cert.common_name(),
        recipient = recipient_cert.common_name(),
        %algorithm,
        payload_len = payload.len(),
        "sealed envelope"
    );
    Ok(SealedEnvelope {
        algorithm,
        encrypted_key,
        encrypted_body,
    })
}

/// Decrypt with the recipient key and verify the sender.
///
/// Stops at the first failing stage: `DecryptionFailure`, then
/// `SenderIdentityMismatch`, then `SignatureInvalid`.
pub fn open<P: CryptoProvider>(
    provider: &P,
    sealed: &SealedEnvelope,
    recipient_key: &KeyPair,
    expected_sender_cert: &Certificate,
) -> Result<Vec<u8>> {
    let as_decryption_failure = |e: SrcprotectError| match e {
        SrcprotectError::DecryptionFailure(_) => e,
        other => SrcprotectError::DecryptionFailure(other.to_string()),
    };

    let content_key = provider
        .unwrap_key(recipient_key, &sealed.encrypted_key)
        .map_err(as_decryption_failure)?;
    if content_key.len() != sealed.algorithm.key_len() {
        return Err(SrcprotectError::DecryptionFailure(format!(
            "content key length {} does not match {}",
            content_key.len(),
            sealed.algorithm
        )));
    }
    let aad = SealedEnvelope::header(sealed.algorithm, &sealed.encrypted_key).map_err(as_decryption_failure)?;
    let signed_bytes = provider
        .decrypt_symmetric(sealed.algorithm, &content_key, &aad, &sealed.encrypted_body)
        .map_err(as_decryption_failure)?;
    let signed = SignedEnvelope::from_bytes(&signed_bytes)?;

    let found = signed.signer.common_name();
    let expected = expected_sender_cert.common_name();
    if found != expected {
        return Err(SrcprotectError::SenderIdentityMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    if signed.signer.public_key() != expected_sender_cert.public_key() {
        return Err(SrcprotectError::SenderIdentityMismatch {
            expected: format!("{} ({})", expected, fingerprint::short_fingerprint(expected_sender_cert.public_key())),
            found: format!("{} ({})", found, fingerprint::short_fingerprint(signed.signer.public_key())),
        });
    }

    signed.verify(provider)?;
    debug!(sender = found, payload_len = signed.payload.len(), "opened envelope");
    Ok(signed.payload)
}
