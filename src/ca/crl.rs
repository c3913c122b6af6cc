//! Certificate Revocation List and the ledger that keeps it durable.
//!
//! Every mutation takes the advisory lock on `CRL.crl.lock`, re-reads the
//! on-disk CRL, merges it with the in-memory one, appends at most one entry,
//! re-signs and persists. Loading never writes. The file is therefore the
//! source of truth, shared by every process using the same home, and a crash
//! between persisting and swapping the in-memory copy is harmless on the next
//! load.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cert::Name;
use crate::crypto::provider::CryptoProvider;
use crate::error::{Result, SrcprotectError};
use crate::keys::{store, KeyPair, PublicKey};

/// Current CRL body format version.
pub const CRL_VERSION: u8 = 2;

/// RFC 5280 revocation reason codes.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub const ALL: [RevocationReason; 10] = [
        Self::Unspecified,
        Self::KeyCompromise,
        Self::CaCompromise,
        Self::AffiliationChanged,
        Self::Superseded,
        Self::CessationOfOperation,
        Self::CertificateHold,
        Self::RemoveFromCrl,
        Self::PrivilegeWithdrawn,
        Self::AaCompromise,
    ];

    /// Numeric code as assigned by RFC 5280 (7 is unused).
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "key-compromise",
            Self::CaCompromise => "ca-compromise",
            Self::AffiliationChanged => "affiliation-changed",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessation-of-operation",
            Self::CertificateHold => "certificate-hold",
            Self::RemoveFromCrl => "remove-from-crl",
            Self::PrivilegeWithdrawn => "privilege-withdrawn",
            Self::AaCompromise => "aa-compromise",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RevocationReason {
    type Err = SrcprotectError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        Self::ALL
            .into_iter()
            .find(|r| r.name() == wanted)
            .ok_or_else(|| SrcprotectError::InvalidInput(format!("unknown revocation reason '{}'", s)))
    }
}

/// One revoked serial. Fields are in alphabetical order for canonical JSON.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevocationEntry {
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
    pub serial_number: u64,
}

/// The signable part of a CRL.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrlBody {
    /// Append order; at most one entry per serial.
    pub entries: Vec<RevocationEntry>,
    pub issuer: Name,
    pub this_update: DateTime<Utc>,
    pub version: u8,
}

impl CrlBody {
    fn canonical_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("cannot encode CRL: {}", e)))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevocationList {
    pub body: CrlBody,
    pub signature: String,
}

impl RevocationList {
    /// Sign a fresh CRL over `entries` with the CA key.
    pub fn sign<P: CryptoProvider>(
        provider: &P,
        ca_key: &KeyPair,
        issuer: Name,
        entries: Vec<RevocationEntry>,
        this_update: DateTime<Utc>,
    ) -> Result<Self> {
        let body = CrlBody {
            entries,
            issuer,
            this_update,
            version: CRL_VERSION,
        };
        let signature = provider.sign(ca_key, body.canonical_json()?.as_bytes())?;
        Ok(Self {
            body,
            signature: BASE64.encode(signature),
        })
    }

    pub fn verify_signature<P: CryptoProvider>(&self, provider: &P, ca_public: &PublicKey) -> Result<()> {
        let sig = BASE64
            .decode(&self.signature)
            .map_err(|e| SrcprotectError::SignatureInvalid(format!("invalid base64 CRL signature: {}", e)))?;
        provider.verify(ca_public, self.body.canonical_json()?.as_bytes(), &sig)
    }

    pub fn entries(&self) -> &[RevocationEntry] {
        &self.body.entries
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.body.this_update
    }

    /// The honored entry for `serial`: the first one appended.
    pub fn entry(&self, serial: u64) -> Option<&RevocationEntry> {
        self.body.entries.iter().find(|e| e.serial_number == serial)
    }

    pub fn is_revoked(&self, serial: u64) -> bool {
        self.entry(serial).is_some()
    }

    pub fn serials(&self) -> HashSet<u64> {
        self.body.entries.iter().map(|e| e.serial_number).collect()
    }
}

/// Merge `extra` into `base`, keeping the first entry seen for each serial
/// and preserving append order.
pub fn merge_entries(base: &[RevocationEntry], extra: &[RevocationEntry]) -> Vec<RevocationEntry> {
    let mut seen = HashSet::new();
    base.iter()
        .chain(extra)
        .filter(|e| seen.insert(e.serial_number))
        .cloned()
        .collect()
}

/// Result of a revocation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RevocationOutcome {
    /// A new entry was appended.
    Revoked(RevocationEntry),
    /// The serial was already listed; the original entry is kept.
    AlreadyRevoked(RevocationEntry),
}

impl RevocationOutcome {
    pub fn entry(&self) -> &RevocationEntry {
        match self {
            Self::Revoked(e) | Self::AlreadyRevoked(e) => e,
        }
    }
}

pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Durable CRL: the on-disk file plus its in-memory cache.
///
/// Not internally synchronized; the owner serializes access within a process
/// and the file lock serializes writers across processes.
#[derive(Debug)]
pub struct RevocationLedger {
    path: PathBuf,
    issuer: Name,
    current: RevocationList,
}

impl RevocationLedger {
    /// Start from an empty, freshly signed CRL (CA bootstrap).
    pub fn create_empty<P: CryptoProvider>(path: &Path, issuer: Name, provider: &P, ca_key: &KeyPair) -> Result<Self> {
        let current = store::with_exclusive_lock(path, || {
            let crl = RevocationList::sign(provider, ca_key, issuer.clone(), Vec::new(), now_millis())?;
            store::save_crl(path, &crl)?;
            Ok(crl)
        })?;
        info!(path = %path.display(), "created empty CRL");
        Ok(Self {
            path: path.to_path_buf(),
            issuer,
            current,
        })
    }

    /// Load and verify the on-disk CRL. Only a missing file is written, as an
    /// empty signed list.
    pub fn open<P: CryptoProvider>(path: &Path, issuer: Name, provider: &P, ca_key: &KeyPair) -> Result<Self> {
        let current = match Self::read_disk(path, provider, ca_key.public())? {
            Some(crl) => crl,
            None => store::with_exclusive_lock(path, || match Self::read_disk(path, provider, ca_key.public())? {
                Some(crl) => Ok(crl),
                None => {
                    let crl = RevocationList::sign(provider, ca_key, issuer.clone(), Vec::new(), now_millis())?;
                    store::save_crl(path, &crl)?;
                    Ok(crl)
                }
            })?,
        };
        info!(path = %path.display(), entries = current.entries().len(), "loaded CRL");
        Ok(Self {
            path: path.to_path_buf(),
            issuer,
            current,
        })
    }

    pub fn current(&self) -> &RevocationList {
        &self.current
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a revocation for `serial` unless one is already recorded.
    pub fn revoke<P: CryptoProvider>(
        &mut self,
        serial: u64,
        reason: RevocationReason,
        provider: &P,
        ca_key: &KeyPair,
    ) -> Result<RevocationOutcome> {
        let path = self.path.clone();
        store::with_exclusive_lock(&path, || {
            let now = now_millis();
            let merged = self.merged_entries(provider, ca_key)?;
            if let Some(existing) = merged.iter().find(|e| e.serial_number == serial).cloned() {
                self.commit(merged, now, provider, ca_key)?;
                debug!(serial, reason = %existing.reason, "serial already revoked");
                return Ok(RevocationOutcome::AlreadyRevoked(existing));
            }

            let candidate = RevocationEntry {
                reason,
                revoked_at: now,
                serial_number: serial,
            };
            let mut entries = merged;
            entries.push(candidate.clone());
            self.commit(entries, now, provider, ca_key)?;
            info!(serial, reason = %reason, "certificate revoked");
            Ok(RevocationOutcome::Revoked(candidate))
        })
    }

    /// Re-derive and re-sign the CRL without adding anything.
    pub fn refresh<P: CryptoProvider>(&mut self, provider: &P, ca_key: &KeyPair) -> Result<()> {
        let path = self.path.clone();
        store::with_exclusive_lock(&path, || {
            let merged = self.merged_entries(provider, ca_key)?;
            self.commit(merged, now_millis(), provider, ca_key)
        })
    }

    /// Caller holds the file lock.
    fn merged_entries<P: CryptoProvider>(&self, provider: &P, ca_key: &KeyPair) -> Result<Vec<RevocationEntry>> {
        let disk = Self::read_disk(&self.path, provider, ca_key.public())?;
        let disk_entries = disk.as_ref().map(|crl| crl.entries()).unwrap_or_default();
        Ok(merge_entries(disk_entries, self.current.entries()))
    }

    /// Caller holds the file lock.
    fn commit<P: CryptoProvider>(
        &mut self,
        entries: Vec<RevocationEntry>,
        this_update: DateTime<Utc>,
        provider: &P,
        ca_key: &KeyPair,
    ) -> Result<()> {
        let next = RevocationList::sign(provider, ca_key, self.issuer.clone(), entries, this_update)?;
        store::save_crl(&self.path, &next)?;
        self.current = next;
        Ok(())
    }

    /// The on-disk CRL after signature verification; `None` when absent.
    ///
    /// A file that does not decode or whose signature does not verify under the
    /// CA key is `StorageCorrupt`, never silently treated as empty.
    fn read_disk<P: CryptoProvider>(path: &Path, provider: &P, ca_public: &PublicKey) -> Result<Option<RevocationList>> {
        match store::load_crl(path)? {
            None => Ok(None),
            Some(crl) => {
                crl.verify_signature(provider, ca_public)
                    .map_err(|e| SrcprotectError::corrupt(path, e))?;
                Ok(Some(crl))
            }
        }
    }
}
