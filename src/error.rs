use thiserror::Error;

use crate::ca::crl::RevocationReason;
use crate::cert::Verdict;

#[derive(Error, Debug)]
pub enum SrcprotectError {
    #[error("Stored credential at {location} is unreadable or malformed: {detail}")]
    StorageCorrupt { location: String, detail: String },

    #[error("Cryptographic operation failed: {0}")]
    CryptoOperationFailure(String),

    #[error("Envelope could not be decrypted: {0}")]
    DecryptionFailure(String),

    #[error("Envelope was signed by '{found}', expected '{expected}'")]
    SenderIdentityMismatch { expected: String, found: String },

    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("Failed to build certificate: {0}")]
    CertificateBuildFailure(String),

    #[error("Certificate {serial} is not within its validity window ({verdict:?})")]
    CertificateTemporalInvalid { serial: u64, verdict: Verdict },

    #[error("Certificate {serial} has been revoked ({reason})")]
    CertificateRevoked { serial: u64, reason: RevocationReason },

    #[error("Failed to seal envelope")]
    EnvelopeSealFailure(#[source] Box<SrcprotectError>),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error on {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SrcprotectError {
    /// Short, stable category suitable for a one-line user notice.
    pub fn category(&self) -> &'static str {
        match self {
            Self::StorageCorrupt { .. } => "storage corrupt",
            Self::CryptoOperationFailure(_) => "crypto failure",
            Self::DecryptionFailure(_) => "decryption failed",
            Self::SenderIdentityMismatch { .. } => "sender mismatch",
            Self::SignatureInvalid(_) => "invalid signature",
            Self::CertificateBuildFailure(_) => "certificate build failed",
            Self::CertificateTemporalInvalid { .. } => "certificate not valid now",
            Self::CertificateRevoked { .. } => "certificate revoked",
            Self::EnvelopeSealFailure(_) => "seal failed",
            Self::InvalidInput(_) => "invalid input",
            Self::Io { .. } => "i/o error",
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &std::path::Path, detail: impl std::fmt::Display) -> Self {
        Self::StorageCorrupt {
            location: path.display().to_string(),
            detail: detail.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SrcprotectError>;
