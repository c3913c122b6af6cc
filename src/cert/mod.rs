//! Certificate module: the signed binding of a subject name to a public key.
//!
//! Signing covers a canonical (compact, alphabetically ordered) JSON rendering of
//! `CertificateBody`; the signature itself lives outside the body.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::provider::CryptoProvider;
use crate::error::{Result, SrcprotectError};
use crate::keys::PublicKey;

/// Organization attribute carried by every name this CA issues.
pub const ORGANIZATION: &str = "SRCPROTECT";

/// Common name of the root certificate authority.
pub const CA_COMMON_NAME: &str = "SRCPROTECT Root CA";

/// Current certificate body format version.
pub const CERTIFICATE_VERSION: u8 = 1;

/// Distinguished name. Fields are in alphabetical order for canonical JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub common_name: String,
    pub organization: String,
}

impl Name {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            organization: ORGANIZATION.to_string(),
        }
    }

    pub fn ca() -> Self {
        Self::new(CA_COMMON_NAME)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CN={},O={}", self.common_name, self.organization)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    DigitalSignature,
    KeyEncipherment,
    KeyCertSign,
    CrlSign,
}

/// Outcome of the trust check run before any envelope exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    NotYetValid,
    Expired,
    Revoked,
}

/// The signable part of a certificate.
///
/// Fields are in alphabetical order. serde serializes struct fields in
/// declaration order, so this yields deterministic JSON without the
/// `preserve_order` serde_json feature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateBody {
    /// Basic constraint: whether this certificate may sign other certificates.
    pub is_ca: bool,
    pub issuer: Name,
    pub key_algorithm: String,
    /// Permitted uses. Enforced for leaf certificates only.
    pub key_usage: Vec<KeyUsage>,
    pub not_after: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub public_key: PublicKey,
    pub serial_number: u64,
    pub subject: Name,
    pub version: u8,
}

impl CertificateBody {
    /// Compact JSON in field-declaration order; the exact bytes that get signed.
    pub fn canonical_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SrcprotectError::CertificateBuildFailure(format!("cannot encode certificate: {}", e)))
    }
}

/// A complete certificate including the issuer's base64 signature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub body: CertificateBody,
    pub signature: String,
}

impl Certificate {
    pub fn from_parts(body: CertificateBody, signature: Vec<u8>) -> Self {
        Self {
            body,
            signature: BASE64.encode(signature),
        }
    }

    pub fn serial_number(&self) -> u64 {
        self.body.serial_number
    }

    pub fn subject(&self) -> &Name {
        &self.body.subject
    }

    pub fn common_name(&self) -> &str {
        &self.body.subject.common_name
    }

    pub fn issuer(&self) -> &Name {
        &self.body.issuer
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.body.public_key
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.body.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.body.not_after
    }

    pub fn is_ca(&self) -> bool {
        self.body.is_ca
    }

    pub fn permits(&self, usage: KeyUsage) -> bool {
        self.body.is_ca || self.body.key_usage.contains(&usage)
    }

    /// Verify the issuer signature over the canonical body.
    ///
    /// Returns `SignatureInvalid` on a bad signature, malformed base64, or a
    /// key that cannot be interpreted.
    pub fn verify_signature(&self, provider: &impl CryptoProvider, issuer_key: &PublicKey) -> Result<()> {
        let json = self.body.canonical_json()?;
        let sig_bytes = BASE64
            .decode(&self.signature)
            .map_err(|e| SrcprotectError::SignatureInvalid(format!("invalid base64 signature: {}", e)))?;
        provider.verify(issuer_key, json.as_bytes(), &sig_bytes)
    }

    /// Issuer equals subject and the signature verifies under the embedded key.
    pub fn is_self_signed(&self, provider: &impl CryptoProvider) -> bool {
        self.body.issuer == self.body.subject && self.verify_signature(provider, self.public_key()).is_ok()
    }

    /// Temporal verdict at `now`: `Valid`, `NotYetValid` or `Expired`.
    pub fn temporal_verdict(&self, now: DateTime<Utc>) -> Verdict {
        if now < self.body.not_before {
            Verdict::NotYetValid
        } else if now > self.body.not_after {
            Verdict::Expired
        } else {
            Verdict::Valid
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::provider::StandardProvider;
    use chrono::Duration;

    fn sample_body(public_key: PublicKey) -> CertificateBody {
        let not_before = DateTime::from_timestamp_millis(1_700_000_000_000).expect("timestamp");
        CertificateBody {
            is_ca: false,
            issuer: Name::ca(),
            key_algorithm: "ed25519".to_string(),
            key_usage: vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment],
            not_after: not_before + Duration::days(365),
            not_before,
            public_key,
            serial_number: 1_700_000_000_000,
            subject: Name::new("alice"),
            version: CERTIFICATE_VERSION,
        }
    }

    #[test]
    fn test_body_serializes_alphabetical_keys() {
        let provider = StandardProvider;
        let body = sample_body(provider.generate_key_pair().public().clone());
        let json = body.canonical_json().expect("canonical_json should succeed");

        let keys = [
            "\"is_ca\"",
            "\"issuer\"",
            "\"key_algorithm\"",
            "\"key_usage\"",
            "\"not_after\"",
            "\"not_before\"",
            "\"public_key\"",
            "\"serial_number\"",
            "\"subject\"",
            "\"version\"",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| json.find(k).unwrap_or_else(|| panic!("{} key missing", k)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "keys out of order: {}", json);
        assert!(!json.contains('\n') && !json.contains(": "), "canonical JSON must be compact");
    }

    #[test]
    fn test_sign_and_verify_round_trip() {
        let provider = StandardProvider;
        let ca_key = provider.generate_key_pair();
        let subject_key = provider.generate_key_pair();
        let cert = provider
            .build_certificate(sample_body(subject_key.public().clone()), &ca_key)
            .expect("build");

        cert.verify_signature(&provider, ca_key.public()).expect("verify");
        assert!(!cert.is_self_signed(&provider));
    }

    #[test]
    fn test_tampered_body_fails_verification() {
        let provider = StandardProvider;
        let ca_key = provider.generate_key_pair();
        let subject_key = provider.generate_key_pair();
        let mut cert = provider
            .build_certificate(sample_body(subject_key.public().clone()), &ca_key)
            .expect("build");

        cert.body.not_after += Duration::days(3650);
        assert!(matches!(
            cert.verify_signature(&provider, ca_key.public()),
            Err(SrcprotectError::SignatureInvalid(_))
        ));
    }

    #[test]
    fn test_temporal_verdict_boundaries() {
        let provider = StandardProvider;
        let cert = provider
            .build_certificate(
                sample_body(provider.generate_key_pair().public().clone()),
                &provider.generate_key_pair(),
            )
            .expect("build");

        assert_eq!(cert.temporal_verdict(cert.not_before()), Verdict::Valid);
        assert_eq!(cert.temporal_verdict(cert.not_after()), Verdict::Valid);
        assert_eq!(
            cert.temporal_verdict(cert.not_before() - Duration::milliseconds(1)),
            Verdict::NotYetValid
        );
        assert_eq!(
            cert.temporal_verdict(cert.not_after() + Duration::milliseconds(1)),
            Verdict::Expired
        );
    }

    #[test]
    fn test_leaf_key_usage_is_restricted() {
        let provider = StandardProvider;
        let cert = provider
            .build_certificate(
                sample_body(provider.generate_key_pair().public().clone()),
                &provider.generate_key_pair(),
            )
            .expect("build");
        assert!(cert.permits(KeyUsage::DigitalSignature));
        assert!(cert.permits(KeyUsage::KeyEncipherment));
        assert!(!cert.permits(KeyUsage::KeyCertSign));
    }

    #[test]
    fn test_name_display() {
        assert_eq!(Name::new("bob").to_string(), "CN=bob,O=SRCPROTECT");
    }
}
