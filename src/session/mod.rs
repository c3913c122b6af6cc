//! Account creation and login on top of the CA and the user registry.

use tracing::{info, warn};

use crate::ca::CertificateAuthority;
use crate::cert::Certificate;
use crate::crypto::provider::CryptoProvider;
use crate::error::{Result, SrcprotectError};
use crate::keys::{store, KeyPair};
use crate::registry::UserRegistry;

/// A logged-in user holding their decrypted key pair.
#[derive(Debug)]
pub struct Session {
    pub username: String,
    pub certificate: Certificate,
    pub key_pair: KeyPair,
}

/// Create an account: key pair, encrypted key file, certificate, registry entry.
///
/// The registry entry is written last, so a failure part-way leaves the name
/// free to be registered again.
pub fn provision_user<P: CryptoProvider>(
    ca: &CertificateAuthority<P>,
    registry: &mut UserRegistry,
    username: &str,
    password: &str,
) -> Result<Certificate> {
    registry.check_new_account(username, password)?;

    let key_pair = ca.provider().generate_key_pair();
    store::save_private_key(&ca.paths().user_key(username), &key_pair, password, ca.kdf())?;
    let certificate = ca.issue_certificate(username, key_pair.public(), false)?;
    registry.register(username, password, ca.kdf())?;

    info!(username, serial = certificate.serial_number(), "provisioned user");
    Ok(certificate)
}

/// Load a user's certificate and confirm it belongs to them and to this CA.
///
/// Used both at login and to resolve the other party of an exchange.
pub fn load_user_certificate<P: CryptoProvider>(ca: &CertificateAuthority<P>, username: &str) -> Result<Certificate> {
    let path = ca.paths().user_certificate(username);
    let certificate = store::load_certificate(&path)?;
    if certificate.common_name() != username {
        return Err(SrcprotectError::corrupt(
            &path,
            format!("certificate is issued to '{}'", certificate.common_name()),
        ));
    }
    ca.verify_issued(&certificate)?;
    Ok(certificate)
}

/// Password check, certificate trust check, then key decryption.
pub fn login<P: CryptoProvider>(
    ca: &CertificateAuthority<P>,
    registry: &UserRegistry,
    username: &str,
    password: &str,
) -> Result<Session> {
    if !registry.verify_password(username, password)? {
        warn!(username, "login rejected: bad credentials");
        return Err(SrcprotectError::InvalidInput("invalid username or password".into()));
    }

    let certificate = load_user_certificate(ca, username)?;
    if let Err(e) = ca.check_login_certificate(&certificate) {
        warn!(username, error = %e, "login rejected: certificate not acceptable");
        return Err(e);
    }

    let key_pair = store::load_private_key(&ca.paths().user_key(username), password, ca.provider())?;
    if key_pair.public() != certificate.public_key() {
        return Err(SrcprotectError::corrupt(
            &ca.paths().user_key(username),
            "private key does not match the user's certificate",
        ));
    }

    info!(username, serial = certificate.serial_number(), "user logged in");
    Ok(Session {
        username: username.to_string(),
        certificate,
        key_pair,
    })
}
