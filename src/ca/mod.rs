//! Certificate authority: root key and certificate, leaf issuance, revocation
//! and the trust verdict consulted before any envelope exchange.

pub mod crl;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use chrono::{DateTime, Months, Utc};
use tracing::{debug, info, warn};

use crate::cert::{Certificate, CertificateBody, KeyUsage, Name, Verdict, CERTIFICATE_VERSION};
use crate::config::{validate_username, AppPaths, Config};
use crate::crypto::provider::{CryptoProvider, StandardProvider};
use crate::crypto::KdfParams;
use crate::error::{Result, SrcprotectError};
use crate::keys::{store, KeyPair, PublicKey};

use self::crl::{now_millis, RevocationLedger, RevocationList, RevocationOutcome, RevocationReason};

/// Internal passphrase protecting the CA private key at rest.
const CA_PASSPHRASE: &str = "CAPasswordShouldBeStoredOtherwise";

const CA_VALIDITY_MONTHS: u32 = 36;
const LEAF_VALIDITY_MONTHS: u32 = 12;

/// Validity window for a new certificate issued at `now`.
///
/// Leaf certificates never outlive the issuing CA certificate.
fn validity_window(
    now: DateTime<Utc>,
    is_ca: bool,
    ca_not_after: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let months = if is_ca { CA_VALIDITY_MONTHS } else { LEAF_VALIDITY_MONTHS };
    let natural = now
        .checked_add_months(Months::new(months))
        .ok_or_else(|| SrcprotectError::CertificateBuildFailure("validity end out of range".into()))?;
    if is_ca {
        return Ok((now, natural));
    }
    let not_after = natural.min(ca_not_after);
    if not_after < now {
        return Err(SrcprotectError::CertificateBuildFailure(format!(
            "CA certificate expired at {}",
            ca_not_after
        )));
    }
    Ok((now, not_after))
}

fn key_usage_for(is_ca: bool) -> Vec<KeyUsage> {
    if is_ca {
        vec![KeyUsage::KeyCertSign, KeyUsage::CrlSign]
    } else {
        vec![KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment]
    }
}

fn millis(t: DateTime<Utc>) -> u64 {
    u64::try_from(t.timestamp_millis()).unwrap_or(0)
}

/// The process-wide authority. Share it through an `Arc`.
///
/// The signing key is only read after construction, so issuance runs
/// concurrently. CRL updates hold the ledger mutex and the CRL file lock for
/// the whole read-merge-append-sign-persist sequence, so authorities in other
/// processes on the same home serialize with this one.
pub struct CertificateAuthority<P: CryptoProvider = StandardProvider> {
    paths: AppPaths,
    kdf: KdfParams,
    provider: P,
    key_pair: KeyPair,
    certificate: Certificate,
    ledger: Mutex<RevocationLedger>,
    last_serial: AtomicU64,
}

impl CertificateAuthority<StandardProvider> {
    /// Load the CA from disk, or bootstrap a fresh one if anything is missing
    /// or unreadable. An error here means startup must be treated as fatal.
    pub fn initialize(config: &Config) -> Result<Self> {
        Self::initialize_with(config, StandardProvider)
    }

    /// Run `initialize` on a background thread. Dependent operations obtain
    /// the authority only through [`PendingAuthority::wait`].
    pub fn spawn_initialize(config: Config) -> Result<PendingAuthority> {
        let handle = std::thread::Builder::new()
            .name("ca-init".into())
            .spawn(move || Self::initialize(&config))
            .map_err(|e| SrcprotectError::CryptoOperationFailure(format!("cannot spawn CA init thread: {}", e)))?;
        Ok(PendingAuthority { handle })
    }
}

impl<P: CryptoProvider> CertificateAuthority<P> {
    pub fn initialize_with(config: &Config, provider: P) -> Result<Self> {
        let paths = config.paths();
        match Self::load(&paths, &provider) {
            Ok((key_pair, certificate, ledger)) => {
                info!(
                    serial = certificate.serial_number(),
                    not_after = %certificate.not_after(),
                    "loaded certificate authority"
                );
                let last_serial = AtomicU64::new(certificate.serial_number());
                Ok(Self {
                    paths,
                    kdf: config.kdf,
                    provider,
                    key_pair,
                    certificate,
                    ledger: Mutex::new(ledger),
                    last_serial,
                })
            }
            Err(e) => {
                warn!(error = %e, "CA state unusable, bootstrapping a new authority");
                Self::bootstrap(config, provider)
            }
        }
    }

    fn load(paths: &AppPaths, provider: &P) -> Result<(KeyPair, Certificate, RevocationLedger)> {
        let certificate = store::load_certificate(&paths.ca_certificate())?;
        let key_pair = store::load_private_key(&paths.ca_key(), CA_PASSPHRASE, provider)?;

        if key_pair.public() != certificate.public_key() {
            return Err(SrcprotectError::corrupt(
                &paths.ca_key(),
                "CA key does not match the CA certificate",
            ));
        }
        if !certificate.is_ca() || !certificate.is_self_signed(provider) {
            return Err(SrcprotectError::corrupt(
                &paths.ca_certificate(),
                "not a self-signed CA certificate",
            ));
        }
        let ledger = RevocationLedger::open(&paths.crl(), certificate.subject().clone(), provider, &key_pair)?;
        Ok((key_pair, certificate, ledger))
    }

    /// Generate a new key pair and self-signed root, persist both, and start
    /// an empty CRL. Replaces any previous CA state.
    pub fn bootstrap(config: &Config, provider: P) -> Result<Self> {
        let paths = config.paths();
        paths.ensure_dirs()?;

        let key_pair = provider.generate_key_pair();
        let now = now_millis();
        let (not_before, not_after) = validity_window(now, true, now)?;
        let body = CertificateBody {
            is_ca: true,
            issuer: Name::ca(),
            key_algorithm: provider.key_algorithm().to_string(),
            key_usage: key_usage_for(true),
            not_after,
            not_before,
            public_key: key_pair.public().clone(),
            serial_number: millis(not_before),
            subject: Name::ca(),
            version: CERTIFICATE_VERSION,
        };
        let certificate = provider.build_certificate(body, &key_pair)?;

        store::save_private_key(&paths.ca_key(), &key_pair, CA_PASSPHRASE, &config.kdf)?;
        store::save_certificate(&paths.ca_certificate(), &certificate)?;
        let ledger = RevocationLedger::create_empty(&paths.crl(), Name::ca(), &provider, &key_pair)?;

        info!(
            serial = certificate.serial_number(),
            not_after = %certificate.not_after(),
            "bootstrapped certificate authority"
        );
        let last_serial = AtomicU64::new(certificate.serial_number());
        Ok(Self {
            paths,
            kdf: config.kdf,
            provider,
            key_pair,
            certificate,
            ledger: Mutex::new(ledger),
            last_serial,
        })
    }

    /// The self-signed root certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    /// Milliseconds of `not_before`, bumped past the last serial handed out.
    fn next_serial(&self, not_before: DateTime<Utc>) -> u64 {
        let wanted = millis(not_before);
        let previous = self
            .last_serial
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(wanted.max(last.saturating_add(1))))
            .unwrap_or_else(|last| last);
        wanted.max(previous.saturating_add(1))
    }

    /// Issue and persist a certificate for `subject` at its user location.
    pub fn issue_certificate(&self, subject: &str, public_key: &PublicKey, is_ca: bool) -> Result<Certificate> {
        validate_username(subject).map_err(|e| SrcprotectError::CertificateBuildFailure(e.to_string()))?;

        let (not_before, not_after) = validity_window(now_millis(), is_ca, self.certificate.not_after())?;
        let body = CertificateBody {
            is_ca,
            issuer: self.certificate.subject().clone(),
            key_algorithm: self.provider.key_algorithm().to_string(),
            key_usage: key_usage_for(is_ca),
            not_after,
            not_before,
            public_key: public_key.clone(),
            serial_number: self.next_serial(not_before),
            subject: Name::new(subject),
            version: CERTIFICATE_VERSION,
        };
        let certificate = self.provider.build_certificate(body, &self.key_pair)?;
        store::save_certificate(&self.paths.user_certificate(subject), &certificate)?;

        info!(
            subject,
            serial = certificate.serial_number(),
            not_after = %certificate.not_after(),
            is_ca,
            "issued certificate"
        );
        Ok(certificate)
    }

    /// Check that `certificate` names this CA as issuer and carries its signature.
    pub fn verify_issued(&self, certificate: &Certificate) -> Result<()> {
        if certificate.issuer() != self.certificate.subject() {
            return Err(SrcprotectError::SignatureInvalid(format!(
                "certificate issued by '{}', not by this authority",
                certificate.issuer()
            )));
        }
        certificate.verify_signature(&self.provider, self.certificate.public_key())
    }

    fn ledger(&self) -> MutexGuard<'_, RevocationLedger> {
        // A panic mid-mutation leaves the previous list in place; the file is
        // re-read on the next mutation anyway.
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `certificate` as revoked. A repeated call for the same serial
    /// keeps the first entry and reports `AlreadyRevoked`.
    pub fn revoke_certificate(&self, certificate: &Certificate, reason: RevocationReason) -> Result<RevocationOutcome> {
        self.verify_issued(certificate)?;
        let outcome = self
            .ledger()
            .revoke(certificate.serial_number(), reason, &self.provider, &self.key_pair)?;
        if let RevocationOutcome::AlreadyRevoked(entry) = &outcome {
            debug!(
                subject = certificate.common_name(),
                serial = entry.serial_number,
                "revocation requested for an already revoked certificate"
            );
        }
        Ok(outcome)
    }

    /// Re-read, re-sign and persist the CRL without adding entries. Also
    /// picks up revocations written by other processes.
    pub fn refresh_crl(&self) -> Result<()> {
        self.ledger().refresh(&self.provider, &self.key_pair)
    }

    /// Snapshot of the current CRL.
    pub fn crl(&self) -> RevocationList {
        self.ledger().current().clone()
    }

    pub fn is_acceptable(&self, certificate: &Certificate) -> Verdict {
        self.is_acceptable_at(certificate, Utc::now())
    }

    pub fn is_acceptable_at(&self, certificate: &Certificate, now: DateTime<Utc>) -> Verdict {
        if self.ledger().current().is_revoked(certificate.serial_number()) {
            return Verdict::Revoked;
        }
        certificate.temporal_verdict(now)
    }

    /// Login-time gate. An expired certificate is revoked with
    /// `PrivilegeWithdrawn` before the error is returned.
    pub fn check_login_certificate(&self, certificate: &Certificate) -> Result<()> {
        self.check_login_certificate_at(certificate, Utc::now())
    }

    pub fn check_login_certificate_at(&self, certificate: &Certificate, now: DateTime<Utc>) -> Result<()> {
        let serial = certificate.serial_number();
        match self.is_acceptable_at(certificate, now) {
            Verdict::Valid => Ok(()),
            Verdict::Revoked => {
                let reason = self
                    .ledger()
                    .current()
                    .entry(serial)
                    .map(|e| e.reason)
                    .unwrap_or(RevocationReason::Unspecified);
                Err(SrcprotectError::CertificateRevoked { serial, reason })
            }
            Verdict::Expired => {
                warn!(
                    subject = certificate.common_name(),
                    serial, "expired certificate presented at login, revoking"
                );
                self.revoke_certificate(certificate, RevocationReason::PrivilegeWithdrawn)?;
                Err(SrcprotectError::CertificateTemporalInvalid {
                    serial,
                    verdict: Verdict::Expired,
                })
            }
            verdict @ Verdict::NotYetValid => Err(SrcprotectError::CertificateTemporalInvalid { serial, verdict }),
        }
    }
}

/// A CA whose initialization is still running on the `ca-init` thread.
pub struct PendingAuthority {
    handle: JoinHandle<Result<CertificateAuthority>>,
}

impl PendingAuthority {
    pub fn is_ready(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the CA is usable.
    pub fn wait(self) -> Result<Arc<CertificateAuthority>> {
        match self.handle.join() {
            Ok(result) => result.map(Arc::new),
            Err(_) => Err(SrcprotectError::CryptoOperationFailure(
                "CA initialization thread panicked".into(),
            )),
        }
    }
}
