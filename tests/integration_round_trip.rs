/// Integration tests: the full CA + envelope lifecycle against a temporary home.
///
/// Tests cover:
///   1. Scenario — bootstrap, issue alice and bob, alice seals for bob, bob opens,
///      then alice is revoked for key compromise
///   2. Restart — revocations and issued certificates survive a reload from disk
///   3. Accounts — provisioning and login through the registry, then a file
///      exchange using the logged-in key pairs
///   4. Concurrency — a CA initialized in the background and shared between
///      threads sealing in parallel
///   5. Shared home — two authorities on the same home, as two processes
///      would be, revoking in parallel and starting up mid-revocation
///
/// All tests are plain `#[test]` with low-cost Argon2 parameters.
use std::collections::HashSet;
use std::sync::Arc;

use srcprotect::ca::crl::{RevocationOutcome, RevocationReason};
use srcprotect::ca::CertificateAuthority;
use srcprotect::cert::Verdict;
use srcprotect::config::Config;
use srcprotect::crypto::provider::CryptoProvider;
use srcprotect::crypto::symmetric::SymmetricAlgorithm;
use srcprotect::crypto::KdfParams;
use srcprotect::envelope::{self, SealedEnvelope};
use srcprotect::registry::UserRegistry;
use srcprotect::session;
use srcprotect::SrcprotectError;

fn fast_config(dir: &tempfile::TempDir) -> Config {
    Config::new(dir.path()).with_kdf(KdfParams {
        m_cost: 256,
        t_cost: 1,
        p_cost: 1,
    })
}

// ── Test 1: alice → bob, then revoke alice ─────────────────────────────────

#[test]
fn test_alice_seals_for_bob_then_alice_is_revoked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ca = CertificateAuthority::initialize(&fast_config(&dir)).expect("initialize CA");
    let provider = ca.provider();

    let alice_key = provider.generate_key_pair();
    let bob_key = provider.generate_key_pair();
    let alice_cert = ca
        .issue_certificate("alice", alice_key.public(), false)
        .expect("issue alice");
    let bob_cert = ca.issue_certificate("bob", bob_key.public(), false).expect("issue bob");

    let sealed = envelope::seal(
        provider,
        b"hello",
        &alice_key,
        &alice_cert,
        &bob_cert,
        SymmetricAlgorithm::Aes256Gcm,
    )
    .expect("seal");
    let wire = sealed.to_bytes().expect("serialize");
    let received = SealedEnvelope::from_bytes(&wire).expect("parse");
    let payload = envelope::open(provider, &received, &bob_key, &alice_cert).expect("open");
    assert_eq!(payload, b"hello");

    assert_eq!(ca.is_acceptable(&alice_cert), Verdict::Valid);
    let outcome = ca
        .revoke_certificate(&alice_cert, RevocationReason::KeyCompromise)
        .expect("revoke");
    assert!(matches!(outcome, RevocationOutcome::Revoked(_)));
    assert_eq!(ca.is_acceptable(&alice_cert), Verdict::Revoked);
    assert_eq!(ca.is_acceptable(&bob_cert), Verdict::Valid);
}

// ── Test 2: restart persistence ────────────────────────────────────────────

#[test]
fn test_revocation_and_certificates_survive_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fast_config(&dir);

    let (alice_cert, root) = {
        let ca = CertificateAuthority::initialize(&config).expect("initialize CA");
        let key = ca.provider().generate_key_pair();
        let cert = ca.issue_certificate("alice", key.public(), false).expect("issue");
        ca.revoke_certificate(&cert, RevocationReason::Superseded)
            .expect("revoke");
        (cert, ca.certificate().clone())
    };

    let ca = CertificateAuthority::initialize(&config).expect("reload CA");
    assert_eq!(ca.certificate(), &root, "restart must reuse the persisted root");
    assert_eq!(ca.is_acceptable(&alice_cert), Verdict::Revoked);
    ca.verify_issued(&alice_cert).expect("issued certificate still verifies");

    let serials_before = ca.crl().serials();
    ca.refresh_crl().expect("refresh");
    assert_eq!(ca.crl().serials(), serials_before, "re-deriving the CRL must not change its entries");

    let again = ca
        .revoke_certificate(&alice_cert, RevocationReason::KeyCompromise)
        .expect("second revoke");
    assert!(matches!(again, RevocationOutcome::AlreadyRevoked(ref e) if e.reason == RevocationReason::Superseded));
}

// ── Test 3: accounts through the registry ──────────────────────────────────

#[test]
fn test_registered_users_exchange_a_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fast_config(&dir);
    let ca = CertificateAuthority::initialize(&config).expect("initialize CA");
    let mut registry = UserRegistry::load(&config.paths().users_file()).expect("registry");

    session::provision_user(&ca, &mut registry, "alice", "alice-pw").expect("provision alice");
    session::provision_user(&ca, &mut registry, "bob", "bob-pw").expect("provision bob");

    let registry = UserRegistry::load(&config.paths().users_file()).expect("reload registry");
    let alice = session::login(&ca, &registry, "alice", "alice-pw").expect("alice login");
    let bob_cert = session::load_user_certificate(&ca, "bob").expect("bob certificate");

    let source = b"fn main() { println!(\"hi\"); }";
    let sealed = envelope::seal(
        ca.provider(),
        source,
        &alice.key_pair,
        &alice.certificate,
        &bob_cert,
        SymmetricAlgorithm::ChaCha20Poly1305,
    )
    .expect("seal");

    let bob = session::login(&ca, &registry, "bob", "bob-pw").expect("bob login");
    let alice_cert = session::load_user_certificate(&ca, "alice").expect("alice certificate");
    let opened = envelope::open(ca.provider(), &sealed, &bob.key_pair, &alice_cert).expect("open");
    assert_eq!(opened, source);

    // bob expecting the file from himself is an identity mismatch, not a decryption error
    assert!(matches!(
        envelope::open(ca.provider(), &sealed, &bob.key_pair, &bob.certificate),
        Err(SrcprotectError::SenderIdentityMismatch { .. })
    ));

    ca.revoke_certificate(&alice.certificate, RevocationReason::CessationOfOperation)
        .expect("revoke");
    assert!(matches!(
        session::login(&ca, &registry, "alice", "alice-pw"),
        Err(SrcprotectError::CertificateRevoked { .. })
    ));
}

// ── Test 4: background initialization and parallel sealing ─────────────────

#[test]
fn test_shared_authority_serves_parallel_exchanges() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pending = CertificateAuthority::spawn_initialize(fast_config(&dir)).expect("spawn");
    let ca = pending.wait().expect("CA ready");

    let recipient_key = ca.provider().generate_key_pair();
    let recipient_cert = ca
        .issue_certificate("bob", recipient_key.public(), false)
        .expect("issue bob");
    let recipient = Arc::new((recipient_key, recipient_cert));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ca = Arc::clone(&ca);
            let recipient = Arc::clone(&recipient);
            std::thread::spawn(move || {
                let key = ca.provider().generate_key_pair();
                let cert = ca
                    .issue_certificate(&format!("sender{}", i), key.public(), false)
                    .expect("issue sender");
                let payload = format!("payload from sender{}", i).into_bytes();
                let sealed = envelope::seal(
                    ca.provider(),
                    &payload,
                    &key,
                    &cert,
                    &recipient.1,
                    SymmetricAlgorithm::ALL[i % 3],
                )
                .expect("seal");
                let opened = envelope::open(ca.provider(), &sealed, &recipient.0, &cert).expect("open");
                assert_eq!(opened, payload);
                cert.serial_number()
            })
        })
        .collect();

    let mut serials: Vec<u64> = handles.into_iter().map(|h| h.join().expect("thread")).collect();
    serials.sort_unstable();
    serials.dedup();
    assert_eq!(serials.len(), 4, "concurrent issuance must hand out distinct serials");
}

// ── Test 5: two authorities sharing one home ───────────────────────────────

#[test]
fn test_authorities_sharing_a_home_lose_no_revocations() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fast_config(&dir);
    let issuer = CertificateAuthority::initialize(&config).expect("initialize CA");
    let key = issuer.provider().generate_key_pair();
    let leaves: Vec<_> = (0..40)
        .map(|i| {
            issuer
                .issue_certificate(&format!("user{}", i), key.public(), false)
                .expect("issue")
        })
        .collect();

    let first = Arc::new(CertificateAuthority::initialize(&config).expect("first authority"));
    let second = Arc::new(CertificateAuthority::initialize(&config).expect("second authority"));
    assert_eq!(first.certificate(), second.certificate());

    let handles: Vec<_> = [first, second]
        .into_iter()
        .enumerate()
        .map(|(worker, ca)| {
            let mine: Vec<_> = leaves.iter().skip(worker).step_by(2).cloned().collect();
            std::thread::spawn(move || {
                for leaf in mine {
                    ca.revoke_certificate(&leaf, RevocationReason::AffiliationChanged)
                        .expect("revoke");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("revoking thread");
    }

    let reloaded = CertificateAuthority::initialize(&config).expect("reload CA");
    let expected: HashSet<u64> = leaves.iter().map(|c| c.serial_number()).collect();
    assert_eq!(reloaded.crl().serials(), expected);
}

#[test]
fn test_startup_with_stale_view_keeps_later_revocation() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = fast_config(&dir);
    let stale = CertificateAuthority::initialize(&config).expect("initialize CA");
    let key = stale.provider().generate_key_pair();
    let alice = stale.issue_certificate("alice", key.public(), false).expect("issue");

    let revoker = CertificateAuthority::initialize(&config).expect("second authority");
    revoker
        .revoke_certificate(&alice, RevocationReason::KeyCompromise)
        .expect("revoke");

    // a read-only startup after the revocation, then the stale one re-signs
    let reader = CertificateAuthority::initialize(&config).expect("reader");
    assert_eq!(reader.is_acceptable(&alice), Verdict::Revoked);
    assert_eq!(stale.is_acceptable(&alice), Verdict::Valid);
    stale.refresh_crl().expect("refresh");
    assert_eq!(stale.is_acceptable(&alice), Verdict::Revoked);

    let reloaded = CertificateAuthority::initialize(&config).expect("reload CA");
    assert_eq!(reloaded.is_acceptable(&alice), Verdict::Revoked);
}
